//! Shared test doubles.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use contest_clock::bus::{BusConfig, BusError, EventPublisher};
use contest_clock::lifecycle::{
    InMemoryLifecycleStore, ItemEnded, ItemId, LifecycleItem, LifecycleStatus, LifecycleStore,
    StoreError,
};

/// Publisher that records every publish.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, String, Vec<u8>)>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn routing_keys(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, k, _)| k.clone()).collect()
    }

    /// Ids of every ended event, in publish order.
    pub fn ended_ids(&self) -> Vec<i64> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, payload)| serde_json::from_slice::<ItemEnded>(payload).unwrap().id.0)
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.sent
            .lock()
            .unwrap()
            .push((exchange.to_string(), routing_key.to_string(), payload));
        Ok(())
    }
}

/// Store wrapper that counts ENDED writes and can be told to fail writes
/// for chosen ids or to stall after an ENDED write.
#[derive(Clone, Default)]
pub struct FaultyStore {
    pub inner: InMemoryLifecycleStore,
    failing: Arc<Mutex<HashSet<ItemId>>>,
    ended_writes: Arc<AtomicUsize>,
    fail_queries: Arc<Mutex<bool>>,
    ended_latency: Arc<Mutex<Option<Duration>>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes_for(&self, id: ItemId) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn heal(&self, id: ItemId) {
        self.failing.lock().unwrap().remove(&id);
    }

    pub fn fail_queries(&self, fail: bool) {
        *self.fail_queries.lock().unwrap() = fail;
    }

    /// Hold every ENDED write open for `latency` after it is stored, the
    /// way a remote database acknowledges late.
    pub fn stall_after_ended_write(&self, latency: Duration) {
        *self.ended_latency.lock().unwrap() = Some(latency);
    }

    pub fn ended_writes(&self) -> usize {
        self.ended_writes.load(Ordering::SeqCst)
    }

    pub async fn status(&self, id: ItemId) -> Option<LifecycleStatus> {
        self.inner.get(id).await.unwrap().map(|item| item.status)
    }
}

#[async_trait]
impl LifecycleStore for FaultyStore {
    async fn get(&self, id: ItemId) -> Result<Option<LifecycleItem>, StoreError> {
        self.inner.get(id).await
    }

    async fn insert(&self, item: LifecycleItem) -> Result<(), StoreError> {
        self.inner.insert(item).await
    }

    async fn update_status(
        &self,
        id: ItemId,
        status: LifecycleStatus,
    ) -> Result<LifecycleItem, StoreError> {
        if self.failing.lock().unwrap().contains(&id) {
            return Err(StoreError::Backend(format!("write for {id} refused")));
        }
        // Yield so concurrent finalizers interleave here if they can.
        tokio::task::yield_now().await;
        let item = self.inner.update_status(id, status).await?;
        if status == LifecycleStatus::Ended {
            self.ended_writes.fetch_add(1, Ordering::SeqCst);
            let latency = *self.ended_latency.lock().unwrap();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
        }
        Ok(item)
    }

    async fn find_unfinished(&self) -> Result<Vec<LifecycleItem>, StoreError> {
        if *self.fail_queries.lock().unwrap() {
            return Err(StoreError::Backend("query refused".into()));
        }
        self.inner.find_unfinished().await
    }
}

/// Bus settings with short timings for paused-clock tests.
pub fn fast_bus() -> BusConfig {
    BusConfig::default()
        .with_heartbeat(Duration::from_millis(50))
        .with_reconnect(Duration::from_millis(10), Duration::from_millis(80))
}

/// Poll `check` until it holds, advancing the (paused) clock in small steps.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
