use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use super::state::{Admission, CircuitStats, Outcome, Transition};
use super::{
    BreakerConfig, BreakerError, BreakerEvent, BreakerObserver, CircuitSnapshot, CircuitState,
    TracingObserver,
};

/// Failure-rate circuit breaker around one kind of outbound call.
///
/// Cheap to clone; clones share state, so one instance per protected call
/// type can be handed to every caller.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<BreakerConfig>,
    stats: Arc<Mutex<CircuitStats>>,
    observers: Arc<Vec<Arc<dyn BreakerObserver>>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker that reports to [`TracingObserver`].
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let observers: Vec<Arc<dyn BreakerObserver>> = vec![Arc::new(TracingObserver)];
        Self {
            name: Arc::from(name.into()),
            config: Arc::new(config),
            stats: Arc::new(Mutex::new(CircuitStats::new(Instant::now()))),
            observers: Arc::new(observers),
        }
    }

    /// Add an observer. Call before cloning the breaker out to callers.
    pub fn with_observer(mut self, observer: Arc<dyn BreakerObserver>) -> Self {
        Arc::make_mut(&mut self.observers).push(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock_stats().state()
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        self.lock_stats().snapshot()
    }

    /// Force the breaker closed and clear its window.
    pub fn reset(&self) {
        let transition = self.lock_stats().reset(Instant::now());
        self.announce(transition);
    }

    /// Run `op` under breaker protection.
    ///
    /// Returns [`BreakerError::Open`] without calling `op` while the circuit
    /// is open, [`BreakerError::Timeout`] if `op` exceeds the call timeout
    /// (the pending future is dropped), and [`BreakerError::Inner`] when `op`
    /// itself fails.
    pub async fn fire<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let trial = match self.admit() {
            Some(trial) => trial,
            None => {
                self.notify(&BreakerEvent::Reject);
                return Err(BreakerError::Open {
                    name: self.name.to_string(),
                });
            }
        };

        self.notify(&BreakerEvent::Fire);
        let mut guard = CallGuard {
            breaker: self,
            trial,
            settled: false,
        };
        let started = Instant::now();

        match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(Ok(value)) => {
                guard.settle(Outcome::Success);
                self.notify(&BreakerEvent::Success {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
                Ok(value)
            }
            Ok(Err(error)) => {
                guard.settle(Outcome::Failure);
                self.notify(&BreakerEvent::Failure {
                    error: error.to_string(),
                });
                Err(BreakerError::Inner(error))
            }
            Err(_) => {
                guard.settle(Outcome::Failure);
                let after = self.config.call_timeout;
                self.notify(&BreakerEvent::Timeout {
                    after_ms: after.as_millis() as u64,
                });
                Err(BreakerError::Timeout {
                    name: self.name.to_string(),
                    after,
                })
            }
        }
    }

    /// Like [`fire`](Self::fire), but every failure is replaced by the value
    /// `fallback` builds from it. Callers cannot tell from the value alone
    /// whether `op` ran.
    pub async fn fire_or_else<F, Fut, T, E, FB>(&self, op: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        FB: FnOnce(&BreakerError<E>) -> T,
    {
        match self.fire(op).await {
            Ok(value) => value,
            Err(error) => {
                self.notify(&BreakerEvent::Fallback {
                    reason: error.to_string(),
                });
                fallback(&error)
            }
        }
    }

    fn admit(&self) -> Option<bool> {
        let (admission, transition) = self.lock_stats().admit(&self.config, Instant::now());
        self.announce(transition);
        match admission {
            Admission::Allowed { trial } => Some(trial),
            Admission::Rejected => None,
        }
    }

    fn record(&self, outcome: Outcome, trial: bool) {
        let transition = self
            .lock_stats()
            .record(&self.config, outcome, trial, Instant::now());
        self.announce(transition);
    }

    fn announce(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            self.notify(&BreakerEvent::StateChange { from, to });
        }
    }

    fn notify(&self, event: &BreakerEvent) {
        for observer in self.observers.iter() {
            observer.on_event(&self.name, event);
        }
    }

    // Counters stay consistent under poisoning: every mutation is a single
    // non-panicking method call.
    fn lock_stats(&self) -> MutexGuard<'_, CircuitStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles the admitted call exactly once. A caller that drops the `fire`
/// future mid-call releases a half-open trial as a failure.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.record(outcome, self.trial);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.record(Outcome::Failure, true);
        }
    }
}
