use thiserror::Error;

use crate::bus::BusError;
use crate::config::ConfigError;
use crate::lifecycle::{SchedulerError, StoreError};

/// Failure while starting the clock service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
