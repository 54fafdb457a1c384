//! Contest and target lifecycle: records, timers, and startup recovery.
//!
//! An item moves `PENDING → ACTIVE → ENDED` and never back. The
//! [`Scheduler`] arms one tokio timer per running item and ends it at its
//! deadline, publishing an [`ItemEnded`] event. Timers live in memory only;
//! after a restart the [`RecoveryRunner`] re-arms future deadlines and ends
//! the ones that passed while the process was down.
//!
//! ```ignore
//! let scheduler = Scheduler::new(InMemoryLifecycleStore::new(), bus.clone(), Topology::contests());
//! scheduler.on_startup().await?;
//! scheduler.on_item_created(ItemId(7), expires_at).await?;
//! ```
//!
//! One scheduler per deployment. Two instances would both arm timers;
//! the idempotent finalize keeps the store correct but only a shared
//! [`LockManager`](crate::lock::LockManager) prevents duplicate publishes.

mod clock;
mod error;
mod events;
mod in_memory;
mod item;
mod recovery;
mod scheduler;
#[cfg(feature = "sqlite")]
mod sqlite;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SchedulerError;
pub use events::{ItemCreated, ItemEnded, Topology};
pub use in_memory::{InMemoryLifecycleStore, Transition};
pub use item::{ItemId, LifecycleItem, LifecycleStatus};
pub use recovery::{RecoveryReport, RecoveryRunner};
pub use scheduler::{Admission, Finalization, Reconciliation, Scheduler};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLifecycleStore;
pub use store::{LifecycleStore, StoreError};
