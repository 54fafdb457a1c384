//! Consumer for item created events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::bus::{BusClient, Delivery, HandlerError, MessageHandler};
use crate::lifecycle::{Admission, ItemCreated, LifecycleStore, Scheduler, SchedulerError};

/// Counters from the created event consumer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStats {
    /// Events that scheduled or immediately ended a new item.
    pub admitted: u64,
    /// Events for items that were already running or already ended.
    pub duplicates: u64,
    /// Events that could not be decoded or processed.
    pub rejected: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    admitted: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn snapshot(&self) -> ServiceStats {
        ServiceStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn reject(&self, error: HandlerError) -> HandlerError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        error
    }
}

/// Feeds created events to the scheduler.
///
/// The bus acknowledges deliveries on receipt, so an error returned here is
/// only logged by the bus. The event is not retried.
pub struct CreatedHandler<S> {
    scheduler: Scheduler<S, BusClient>,
    stats: Arc<StatsCounters>,
}

impl<S: LifecycleStore> CreatedHandler<S> {
    pub(crate) fn new(scheduler: Scheduler<S, BusClient>, stats: Arc<StatsCounters>) -> Self {
        Self { scheduler, stats }
    }
}

#[async_trait]
impl<S: LifecycleStore> MessageHandler for CreatedHandler<S> {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        if delivery.routing_key != self.scheduler.topology().created_key {
            return Err(self
                .stats
                .reject(HandlerError::UnknownRoutingKey(delivery.routing_key)));
        }
        let event: ItemCreated = delivery.decode().map_err(|e| self.stats.reject(e))?;

        match self.scheduler.on_item_created(event.id, event.expires_at).await {
            Ok(Admission::AlreadyEnded) => {
                debug!(item_id = %event.id, "created event for ended item");
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(_) => {
                self.stats.admitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SchedulerError::Duplicate(id)) => {
                warn!(item_id = %id, "ignoring created event for running item");
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => Err(self.stats.reject(HandlerError::Failed(e.to_string()))),
        }
    }
}
