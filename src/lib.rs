//! Contest and target lifecycle clock.
//!
//! - [`breaker`]: failure-rate circuit breaker for outbound calls.
//! - [`bus`]: topic bus client that backlogs publishes during outages.
//! - [`lifecycle`]: item records, per-item timers and startup recovery.
//! - [`lock`]: per-key locks serializing work on one item.
//! - [`service`]: everything wired together behind one `start` call.

pub mod breaker;
pub mod bus;
mod config;
#[cfg(feature = "http")]
pub mod http;
pub mod lifecycle;
pub mod lock;
pub mod service;
mod telemetry;

pub use breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
pub use bus::{BusClient, BusConfig, BusError, EventPublisher, InMemoryBroker, OverflowPolicy};
pub use config::{ClockConfig, ConfigError};
pub use lifecycle::{
    Admission, Finalization, InMemoryLifecycleStore, ItemCreated, ItemEnded, ItemId,
    LifecycleItem, LifecycleStatus, LifecycleStore, RecoveryReport, RecoveryRunner, Scheduler,
    SchedulerError, StoreError, Topology,
};
pub use lock::{InMemoryLockManager, LockError, LockManager};
pub use service::{ClockService, ServiceError, ServiceStats};
pub use telemetry::init_tracing;

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
