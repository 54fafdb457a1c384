//! HashMap-backed lifecycle store for tests, development and single-node use.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Clock, ItemId, LifecycleItem, LifecycleStatus, LifecycleStore, StoreError, SystemClock};

/// One recorded status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<LifecycleStatus>,
    pub to: LifecycleStatus,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    items: HashMap<ItemId, LifecycleItem>,
    history: HashMap<ItemId, Vec<Transition>>,
}

/// In-memory [`LifecycleStore`]. Clone-friendly via Arc; clones share data.
///
/// Keeps an ordered transition history per id, starting with the insert.
#[derive(Clone)]
pub struct InMemoryLifecycleStore {
    state: Arc<RwLock<State>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryLifecycleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLifecycleStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` to stamp `updated_at` on transitions.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            clock,
        }
    }

    /// Status changes recorded for `id`, oldest first.
    pub fn history(&self, id: ItemId) -> Vec<Transition> {
        self.state
            .read()
            .map(|s| s.history.get(&id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every record, sorted by id.
    pub fn all(&self) -> Vec<LifecycleItem> {
        let mut items: Vec<_> = self
            .state
            .read()
            .map(|s| s.items.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by_key(|item| item.id);
        items
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".into())
}

#[async_trait]
impl LifecycleStore for InMemoryLifecycleStore {
    async fn get(&self, id: ItemId) -> Result<Option<LifecycleItem>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.items.get(&id).cloned())
    }

    async fn insert(&self, item: LifecycleItem) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if state.items.contains_key(&item.id) {
            return Err(StoreError::Duplicate(item.id));
        }
        state.history.entry(item.id).or_default().push(Transition {
            from: None,
            to: item.status,
            at: item.updated_at,
        });
        state.items.insert(item.id, item);
        Ok(())
    }

    async fn update_status(
        &self,
        id: ItemId,
        status: LifecycleStatus,
    ) -> Result<LifecycleItem, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let item = state.items.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let from = item.status;
        let changed = item.advance(status, now)?;
        let stored = item.clone();
        if changed {
            state.history.entry(id).or_default().push(Transition {
                from: Some(from),
                to: status,
                at: now,
            });
        }
        Ok(stored)
    }

    async fn find_unfinished(&self) -> Result<Vec<LifecycleItem>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut items: Vec<_> = state
            .items
            .values()
            .filter(|item| !item.status.is_terminal())
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.expires_at, item.id));
        Ok(items)
    }
}
