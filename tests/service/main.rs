//! Clock service end-to-end tests over the in-memory broker.
//!
//! - Created events on the bus become ended events at the deadline
//! - Startup recovery runs before the created subscription exists
//! - Broker outages delay ended events but do not lose them

#[path = "../support/mod.rs"]
mod support;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use contest_clock::bus::InMemoryBroker;
use contest_clock::lifecycle::{
    InMemoryLifecycleStore, ItemEnded, ItemId, LifecycleItem, LifecycleStatus, LifecycleStore,
    Topology,
};
use contest_clock::{init_tracing, ClockConfig, ClockService, ServiceStats};
use serde_json::json;

use support::{eventually, fast_bus};

fn config() -> ClockConfig {
    init_tracing();
    ClockConfig::new("memory://broker")
        .with_bus(fast_bus())
        .with_topology(Topology::contests())
}

fn ended_ids(broker: &InMemoryBroker) -> Vec<i64> {
    broker
        .published_with_key("contest.end")
        .iter()
        .map(|m| m.decode::<ItemEnded>().unwrap().id.0)
        .collect()
}

fn created(id: i64, expires_in: ChronoDuration) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "contestId": id,
        "startDate": Utc::now(),
        "endDate": Utc::now() + expires_in,
    }))
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn created_event_ends_at_deadline() {
    let broker = InMemoryBroker::new();
    let service = ClockService::start(broker.clone(), config()).await.unwrap();

    broker.inject("contestQueue", "contest.start", created(1, ChronoDuration::seconds(30)));
    eventually(|| service.scheduler().is_armed(ItemId(1))).await;
    assert!(ended_ids(&broker).is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(ended_ids(&broker), vec![1]);
    assert_eq!(service.stats().admitted, 1);
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_and_malformed_events_are_counted() {
    let broker = InMemoryBroker::new();
    let service = ClockService::start(broker.clone(), config()).await.unwrap();

    broker.inject("contestQueue", "contest.start", created(2, ChronoDuration::minutes(5)));
    broker.inject("contestQueue", "contest.start", created(2, ChronoDuration::minutes(5)));
    broker.inject("contestQueue", "contest.start", "not json");

    eventually(|| service.stats().rejected == 1).await;
    assert_eq!(
        service.stats(),
        ServiceStats {
            admitted: 1,
            duplicates: 1,
            rejected: 1,
        }
    );
    assert_eq!(service.scheduler().armed_count(), 1);
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn startup_recovers_overdue_items_before_consuming() {
    let broker = InMemoryBroker::new();
    let store = InMemoryLifecycleStore::new();
    let now = Utc::now();
    store
        .insert(LifecycleItem::pending(ItemId(7), now - ChronoDuration::hours(1), now))
        .await
        .unwrap();
    store
        .insert(LifecycleItem::pending(ItemId(8), now + ChronoDuration::minutes(1), now))
        .await
        .unwrap();

    let service = ClockService::start_with_store(broker.clone(), config(), store.clone())
        .await
        .unwrap();

    let report = service.recovery();
    assert_eq!((report.finalized, report.rearmed), (1, 1));
    assert_eq!(ended_ids(&broker), vec![7]);
    assert_eq!(
        store.get(ItemId(7)).await.unwrap().unwrap().status,
        LifecycleStatus::Ended
    );
    assert!(broker.has_consumer("contestQueue"));
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ended_events_wait_out_a_broker_outage() {
    let broker = InMemoryBroker::new();
    broker.set_available(false);
    let store = InMemoryLifecycleStore::new();
    let now = Utc::now();
    store
        .insert(LifecycleItem::pending(ItemId(9), now - ChronoDuration::minutes(1), now))
        .await
        .unwrap();

    let service = ClockService::start_with_store(broker.clone(), config(), store)
        .await
        .unwrap();
    assert!(!service.bus().is_connected());
    assert_eq!(service.bus().backlog_len(), 1);

    broker.set_available(true);
    eventually(|| service.bus().is_connected()).await;
    assert_eq!(ended_ids(&broker), vec![9]);

    // The created subscription was set up on reconnect.
    broker.inject("contestQueue", "contest.start", created(10, ChronoDuration::seconds(-1)));
    eventually(|| ended_ids(&broker).len() == 2).await;
    assert_eq!(ended_ids(&broker), vec![9, 10]);
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_running_items_for_the_next_start() {
    let broker = InMemoryBroker::new();
    let store = InMemoryLifecycleStore::new();
    let service = ClockService::start_with_store(broker.clone(), config(), store.clone())
        .await
        .unwrap();
    broker.inject("contestQueue", "contest.start", created(11, ChronoDuration::seconds(20)));
    eventually(|| service.scheduler().is_armed(ItemId(11))).await;

    service.shutdown().await;
    assert_eq!(service.scheduler().armed_count(), 0);
    assert_eq!(
        store.get(ItemId(11)).await.unwrap().unwrap().status,
        LifecycleStatus::Active
    );

    let restarted = ClockService::start_with_store(broker.clone(), config(), store)
        .await
        .unwrap();
    assert_eq!(restarted.recovery().rearmed, 1);
    assert!(ended_ids(&broker).is_empty());

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(ended_ids(&broker), vec![11]);
    restarted.shutdown().await;
}
