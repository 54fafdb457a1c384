//! Pure state machine behind [`CircuitBreaker`](super::CircuitBreaker).
//!
//! All timestamps are `tokio::time::Instant`, so tests can drive the breaker
//! with a paused clock.

use serde::Serialize;
use tokio::time::Instant;

use super::BreakerConfig;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of the breaker counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub window_start: Instant,
    pub opened_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
}

/// Result of asking the breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Go ahead; `trial` marks the single half-open trial call.
    Allowed { trial: bool },
    Rejected,
}

pub(crate) type Transition = (CircuitState, CircuitState);

#[derive(Debug)]
pub(crate) struct CircuitStats {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    window_start: Instant,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitStats {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            window_start: now,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            window_start: self.window_start,
            opened_at: self.opened_at,
        }
    }

    pub(crate) fn admit(
        &mut self,
        config: &BreakerConfig,
        now: Instant,
    ) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => {
                self.roll_window(config, now);
                (Admission::Allowed { trial: false }, None)
            }
            CircuitState::Open => {
                let reopen_at = self
                    .opened_at
                    .map(|opened| opened + config.open_duration)
                    .unwrap_or(now);
                if now >= reopen_at {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    (
                        Admission::Allowed { trial: true },
                        Some((CircuitState::Open, CircuitState::HalfOpen)),
                    )
                } else {
                    (Admission::Rejected, None)
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    (Admission::Rejected, None)
                } else {
                    self.trial_in_flight = true;
                    (Admission::Allowed { trial: true }, None)
                }
            }
        }
    }

    pub(crate) fn record(
        &mut self,
        config: &BreakerConfig,
        outcome: Outcome,
        trial: bool,
        now: Instant,
    ) -> Option<Transition> {
        if trial && self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
            return match outcome {
                Outcome::Success => {
                    self.close(now);
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                }
                Outcome::Failure => {
                    self.open(now);
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
            };
        }

        // Calls admitted before a trip may complete afterwards; they no
        // longer influence an open breaker.
        if self.state != CircuitState::Closed {
            return None;
        }

        self.roll_window(config, now);
        match outcome {
            Outcome::Success => self.success_count += 1,
            Outcome::Failure => self.failure_count += 1,
        }

        let total = self.failure_count + self.success_count;
        let tripped = self.failure_count > 0
            && total >= config.minimum_requests
            && u64::from(self.failure_count) * 100
                >= u64::from(config.error_threshold_percent) * u64::from(total);

        if tripped {
            self.open(now);
            Some((CircuitState::Closed, CircuitState::Open))
        } else {
            None
        }
    }

    pub(crate) fn reset(&mut self, now: Instant) -> Option<Transition> {
        let previous = self.state;
        self.close(now);
        self.trial_in_flight = false;
        (previous != CircuitState::Closed).then_some((previous, CircuitState::Closed))
    }

    fn roll_window(&mut self, config: &BreakerConfig, now: Instant) {
        if now.duration_since(self.window_start) >= config.rolling_window {
            self.window_start = now;
            self.failure_count = 0;
            self.success_count = 0;
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
    }

    fn close(&mut self, now: Instant) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.failure_count = 0;
        self.success_count = 0;
        self.window_start = now;
    }
}
