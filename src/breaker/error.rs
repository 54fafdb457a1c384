use std::time::Duration;

use thiserror::Error;

/// Why a breaker-protected call did not produce a value.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open (or a half-open trial is already running); the
    /// operation was not attempted.
    #[error("circuit {name} is open")]
    Open { name: String },
    /// The operation did not finish within the configured call timeout.
    #[error("call through circuit {name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },
    /// The operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// True when the wrapped operation was never started.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The operation's own error, if it ran to completion.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }
}
