//! Per-key mutual exclusion.
//!
//! The scheduler serializes every check-and-set on an item through a lock
//! keyed by the item id. [`InMemoryLockManager`] covers a single process;
//! a deployment running several scheduler instances would plug in a
//! distributed [`LockManager`] (Redis, Postgres advisory locks, ...).

mod error;
mod in_memory;
mod lock_manager;

pub use error::LockError;
pub use in_memory::{InMemoryLockManager, KeyGuard};
pub use lock_manager::LockManager;
