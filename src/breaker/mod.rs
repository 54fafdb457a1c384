//! Circuit breaker for outbound calls to collaborator services.
//!
//! ```text
//!            failures >= threshold            open_duration elapsed
//!   CLOSED ───────────────────────────▶ OPEN ─────────────────────▶ HALF_OPEN
//!     ▲     (rolling window, min sample)  ▲                           │
//!     │                                   │       trial failed        │
//!     │                                   └───────────────────────────┤
//!     │                    trial succeeded                            │
//!     └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! While OPEN every call is rejected without running the wrapped operation.
//! HALF_OPEN admits exactly one trial call; concurrent callers are rejected
//! until the trial settles. A call exceeding `call_timeout` counts as a
//! failure and its eventual result is discarded.
//!
//! ## Example
//!
//! ```ignore
//! use contest_clock::breaker::{BreakerConfig, CircuitBreaker};
//!
//! let breaker = CircuitBreaker::new("target-service", BreakerConfig::default());
//! let body = breaker
//!     .fire_or_else(|| fetch_targets(), |_| "Sorry, out of service right now".to_string())
//!     .await;
//! ```

mod circuit_breaker;
mod config;
mod error;
mod events;
mod state;

pub use circuit_breaker::CircuitBreaker;
pub use config::BreakerConfig;
pub use error::BreakerError;
#[cfg(feature = "emitter")]
pub use events::EmitterObserver;
pub use events::{BreakerEvent, BreakerObserver, TracingObserver};
pub use state::{CircuitSnapshot, CircuitState};
