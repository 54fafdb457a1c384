use thiserror::Error;

/// Error type for lock operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock registry was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    Poisoned(String),
    /// The lock could not be obtained.
    #[error("lock acquire failed: {0}")]
    AcquireFailed(String),
}
