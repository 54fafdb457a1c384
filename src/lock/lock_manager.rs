use async_trait::async_trait;

use super::LockError;

/// Hands out one logical lock per key.
///
/// Holding the returned guard excludes every other holder of the same key;
/// dropping it releases the lock.
#[async_trait]
pub trait LockManager: Send + Sync {
    type Guard: Send + 'static;

    /// Wait until the lock for `key` is free and take it.
    async fn acquire(&self, key: &str) -> Result<Self::Guard, LockError>;

    /// Take the lock for `key` only if nobody holds it.
    fn try_acquire(&self, key: &str) -> Result<Option<Self::Guard>, LockError>;

    /// Drop bookkeeping for keys nobody holds. Returns how many were dropped.
    fn prune(&self) -> usize {
        0
    }
}
