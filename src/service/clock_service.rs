use std::sync::Arc;

use tracing::info;

use crate::bus::{BusClient, Connector};
use crate::config::ClockConfig;
#[cfg(feature = "sqlite")]
use crate::config::ConfigError;
#[cfg(feature = "sqlite")]
use crate::lifecycle::SqliteLifecycleStore;
use crate::lifecycle::{InMemoryLifecycleStore, LifecycleStore, RecoveryReport, Scheduler};

use super::handler::{CreatedHandler, StatsCounters};
use super::{ServiceError, ServiceStats};

/// The running lifecycle clock: bus client, scheduler and created event
/// consumer.
///
/// ## Example
///
/// ```ignore
/// let config = ClockConfig::from_env()?;
/// let service = ClockService::start(InMemoryBroker::new(), config).await?;
/// println!("recovered: {:?}", service.recovery());
/// // ...
/// service.shutdown().await;
/// ```
pub struct ClockService<S> {
    bus: BusClient,
    scheduler: Scheduler<S, BusClient>,
    stats: Arc<StatsCounters>,
    recovery: RecoveryReport,
}

impl ClockService<InMemoryLifecycleStore> {
    /// Start with an in-memory store.
    pub async fn start(connector: impl Connector, config: ClockConfig) -> Result<Self, ServiceError> {
        Self::start_with_store(connector, config, InMemoryLifecycleStore::new()).await
    }

    /// Read [`ClockConfig`] from the environment and start.
    pub async fn from_env(connector: impl Connector) -> Result<Self, ServiceError> {
        let config = ClockConfig::from_env()?;
        Self::start(connector, config).await
    }
}

#[cfg(feature = "sqlite")]
impl ClockService<SqliteLifecycleStore> {
    /// Start with the SQLite store at [`ClockConfig::database_path`]
    /// (`CLOCK_DATABASE`). Items survive restarts of the process.
    pub async fn start_persistent(
        connector: impl Connector,
        config: ClockConfig,
    ) -> Result<Self, ServiceError> {
        let path = config
            .database_path
            .clone()
            .ok_or_else(|| ConfigError::Missing("CLOCK_DATABASE".into()))?;
        let store = SqliteLifecycleStore::open(&path).await?;
        Self::start_with_store(connector, config, store).await
    }
}

impl<S: LifecycleStore> ClockService<S> {
    /// Connect the bus, recover stored items, then start consuming created
    /// events.
    ///
    /// Recovery finishes before the subscription exists, so a created
    /// event can never race recovery for the same item. An unreachable
    /// broker does not fail startup; ended events go to the backlog until
    /// it comes back.
    pub async fn start_with_store(
        connector: impl Connector,
        config: ClockConfig,
        store: S,
    ) -> Result<Self, ServiceError> {
        let bus = BusClient::new(connector, config.bus.clone());
        bus.connect(config.rabbitmq_url.clone()).await?;

        let topology = config.topology;
        let scheduler = Scheduler::new(store, bus.clone(), topology.clone());
        let recovery = scheduler.on_startup().await?;

        let stats = Arc::new(StatsCounters::default());
        let handler = CreatedHandler::new(scheduler.clone(), Arc::clone(&stats));
        bus.subscribe(&topology.exchange, &[topology.created_key.as_str()], handler)
            .await?;

        info!(
            exchange = %topology.exchange,
            created_key = %topology.created_key,
            ended_key = %topology.ended_key,
            armed = scheduler.armed_count(),
            "clock service started"
        );

        Ok(Self {
            bus,
            scheduler,
            stats,
            recovery,
        })
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats.snapshot()
    }

    /// What startup recovery did.
    pub fn recovery(&self) -> RecoveryReport {
        self.recovery
    }

    pub fn scheduler(&self) -> &Scheduler<S, BusClient> {
        &self.scheduler
    }

    pub fn bus(&self) -> &BusClient {
        &self.bus
    }

    /// Stop the scheduler, let an ended event already being written reach
    /// the bus, then close the bus. Stored items stay as they are for the
    /// next start to recover.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.bus.close();
        info!("clock service stopped");
    }
}
