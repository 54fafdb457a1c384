use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{LockError, LockManager};

/// Held lock for one key. Released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// In-memory lock manager backed by a `HashMap<String, Arc<Mutex<()>>>`.
///
/// Creates one async mutex per key on first use. Waiting never blocks a
/// runtime thread. Idle entries can be dropped with [`prune`](Self::prune).
#[derive(Default)]
pub struct InMemoryLockManager {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Result<Arc<AsyncMutex<()>>, LockError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| LockError::Poisoned("lock manager map poisoned".into()))?;
        Ok(locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    type Guard = KeyGuard;

    async fn acquire(&self, key: &str) -> Result<KeyGuard, LockError> {
        let lock = self.entry(key)?;
        let guard = lock.lock_owned().await;
        Ok(KeyGuard {
            key: key.to_string(),
            _guard: guard,
        })
    }

    fn try_acquire(&self, key: &str) -> Result<Option<KeyGuard>, LockError> {
        let lock = self.entry(key)?;
        Ok(lock.try_lock_owned().ok().map(|guard| KeyGuard {
            key: key.to_string(),
            _guard: guard,
        }))
    }

    /// Forgets locks nobody holds or waits for.
    fn prune(&self) -> usize {
        let Ok(mut locks) = self.locks.lock() else {
            return 0;
        };
        let before = locks.len();
        // Holders and waiters own a clone of the Arc; the map's own reference
        // is the only one left on an idle lock.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }
}
