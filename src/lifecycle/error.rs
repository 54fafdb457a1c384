use thiserror::Error;

use crate::bus::BusError;
use crate::lock::LockError;

use super::{ItemId, StoreError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A created event arrived for an item that is still running.
    #[error("item {0} is already scheduled")]
    Duplicate(ItemId),
    #[error("item {0} not found")]
    NotFound(ItemId),
    /// The scheduler was shut down; the item is left for recovery.
    #[error("scheduler is shut down")]
    Stopped,
    #[error(transparent)]
    Store(StoreError),
    #[error("failed to publish ended event: {0}")]
    Publish(#[from] BusError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<StoreError> for SchedulerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(id) => SchedulerError::Duplicate(id),
            StoreError::NotFound(id) => SchedulerError::NotFound(id),
            other => SchedulerError::Store(other),
        }
    }
}
