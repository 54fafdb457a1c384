//! Breaker lifecycle notifications.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::CircuitState;

/// Something that happened to a protected call or to the breaker itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BreakerEvent {
    /// A call was admitted and is about to run.
    Fire,
    Success { elapsed_ms: u64 },
    Failure { error: String },
    Timeout { after_ms: u64 },
    /// A call was refused without running.
    Reject,
    StateChange { from: CircuitState, to: CircuitState },
    /// The caller received its fallback value instead of a result.
    Fallback { reason: String },
}

impl BreakerEvent {
    /// Short event name; state changes are named after the state entered.
    pub fn name(&self) -> &'static str {
        match self {
            BreakerEvent::Fire => "fire",
            BreakerEvent::Success { .. } => "success",
            BreakerEvent::Failure { .. } => "failure",
            BreakerEvent::Timeout { .. } => "timeout",
            BreakerEvent::Reject => "reject",
            BreakerEvent::StateChange { to, .. } => match to {
                CircuitState::Closed => "close",
                CircuitState::Open => "open",
                CircuitState::HalfOpen => "half_open",
            },
            BreakerEvent::Fallback { .. } => "fallback",
        }
    }
}

/// Receives breaker notifications.
///
/// Observers are called inline on the calling task after the breaker has
/// released its internal lock, so they must return quickly.
pub trait BreakerObserver: Send + Sync {
    fn on_event(&self, breaker: &str, event: &BreakerEvent);
}

/// Writes every notification to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BreakerObserver for TracingObserver {
    fn on_event(&self, breaker: &str, event: &BreakerEvent) {
        match event {
            BreakerEvent::Fire | BreakerEvent::Success { .. } => {
                debug!(breaker, event = event.name(), "breaker call");
            }
            BreakerEvent::Failure { error } => warn!(breaker, %error, "breaker call failed"),
            BreakerEvent::Timeout { after_ms } => warn!(breaker, after_ms, "breaker call timed out"),
            BreakerEvent::Reject => debug!(breaker, "breaker rejected call"),
            BreakerEvent::StateChange { from, to } => {
                info!(breaker, from = ?from, to = ?to, "breaker state changed")
            }
            BreakerEvent::Fallback { reason } => info!(breaker, %reason, "breaker fallback used"),
        }
    }
}

#[cfg(feature = "emitter")]
pub use emitter::EmitterObserver;

#[cfg(feature = "emitter")]
mod emitter {
    use std::sync::Mutex;

    use event_emitter_rs::EventEmitter;
    use serde::Serialize;
    use tracing::warn;

    use super::{BreakerEvent, BreakerObserver};

    #[derive(Serialize)]
    struct Emitted<'a> {
        breaker: &'a str,
        #[serde(flatten)]
        event: &'a BreakerEvent,
    }

    /// Re-emits notifications on an [`EventEmitter`] under [`BreakerEvent::name`].
    ///
    /// Listeners receive the event as a JSON string and run on the emitter's
    /// own threads, so they never hold up the protected call.
    ///
    /// ```ignore
    /// let observer = Arc::new(EmitterObserver::new());
    /// observer.on("open", |json: String| eprintln!("breaker opened: {json}"));
    /// let breaker = CircuitBreaker::new("scores", config).with_observer(observer);
    /// ```
    pub struct EmitterObserver {
        emitter: Mutex<EventEmitter>,
    }

    impl Default for EmitterObserver {
        fn default() -> Self {
            Self::new()
        }
    }

    impl EmitterObserver {
        pub fn new() -> Self {
            Self {
                emitter: Mutex::new(EventEmitter::new()),
            }
        }

        /// Register a listener for one event name (`"open"`, `"fallback"`, ...).
        pub fn on<F>(&self, event: &str, listener: F)
        where
            F: Fn(String) + Send + Sync + 'static,
        {
            let mut emitter = self
                .emitter
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            emitter.on(event, listener);
        }
    }

    impl BreakerObserver for EmitterObserver {
        fn on_event(&self, breaker: &str, event: &BreakerEvent) {
            let json = match serde_json::to_string(&Emitted { breaker, event }) {
                Ok(json) => json,
                Err(e) => {
                    warn!(breaker, error = %e, "failed to encode breaker event");
                    return;
                }
            };
            let mut emitter = self
                .emitter
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            emitter.emit(event.name(), json);
        }
    }
}
