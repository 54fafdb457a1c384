use async_trait::async_trait;
use thiserror::Error;

use super::{ItemId, LifecycleItem, LifecycleStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("item {0} already exists")]
    Duplicate(ItemId),
    #[error("item {0} not found")]
    NotFound(ItemId),
    #[error("item {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ItemId,
        from: LifecycleStatus,
        to: LifecycleStatus,
    },
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Durable record of every scheduled item.
///
/// Records are never deleted. Status writes go through
/// [`LifecycleItem::advance`], so a store can never move an item backwards.
#[async_trait]
pub trait LifecycleStore: Send + Sync + 'static {
    async fn get(&self, id: ItemId) -> Result<Option<LifecycleItem>, StoreError>;

    /// Insert a new record. Fails with [`StoreError::Duplicate`] if the id exists.
    async fn insert(&self, item: LifecycleItem) -> Result<(), StoreError>;

    /// Move an item to `status` and persist it. Returns the stored record.
    async fn update_status(
        &self,
        id: ItemId,
        status: LifecycleStatus,
    ) -> Result<LifecycleItem, StoreError>;

    /// Every record that has not reached [`LifecycleStatus::Ended`].
    async fn find_unfinished(&self) -> Result<Vec<LifecycleItem>, StoreError>;
}
