//! Scheduler and recovery integration tests.
//!
//! - Finalize is idempotent under concurrency
//! - Recovery ends overdue items exactly once and re-arms the rest
//! - One item's failure never disturbs another item's timer

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use contest_clock::lifecycle::{
    Admission, Finalization, ItemId, LifecycleItem, LifecycleStatus, LifecycleStore, Scheduler,
    SchedulerError, Topology,
};

use support::{FaultyStore, RecordingPublisher};

type TestScheduler = Scheduler<FaultyStore, Arc<RecordingPublisher>>;

fn setup() -> (TestScheduler, FaultyStore, Arc<RecordingPublisher>) {
    let store = FaultyStore::new();
    let publisher = RecordingPublisher::new();
    let scheduler = Scheduler::new(store.clone(), publisher.clone(), Topology::contests());
    (scheduler, store, publisher)
}

async fn seed(store: &FaultyStore, id: i64, expires_in: ChronoDuration, status: LifecycleStatus) {
    let now = Utc::now();
    store
        .inner
        .insert(LifecycleItem::pending(ItemId(id), now + expires_in, now))
        .await
        .unwrap();
    if status != LifecycleStatus::Pending {
        store.inner.update_status(ItemId(id), status).await.unwrap();
    }
}

// ============================================================================
// Idempotent finalize
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_finalize_writes_and_publishes_once() {
    let (scheduler, store, publisher) = setup();
    seed(&store, 1, ChronoDuration::hours(1), LifecycleStatus::Active).await;

    let calls: Vec<_> = (0..16)
        .map(|_| {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.finalize(ItemId(1)).await.unwrap() })
        })
        .collect();

    let mut ended = 0;
    for call in calls {
        if call.await.unwrap() == Finalization::Ended {
            ended += 1;
        }
    }

    assert_eq!(ended, 1);
    assert_eq!(store.ended_writes(), 1);
    assert_eq!(publisher.ended_ids(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn finalize_at_the_deadline_races_the_timer_harmlessly() {
    let (scheduler, store, publisher) = setup();
    scheduler
        .on_item_created(ItemId(2), Utc::now() + ChronoDuration::milliseconds(20))
        .await
        .unwrap();

    // Wake at the same instant as the timer.
    tokio::time::sleep(Duration::from_millis(20)).await;
    scheduler.finalize(ItemId(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(store.ended_writes(), 1);
    assert_eq!(publisher.ended_ids(), vec![2]);
    assert_eq!(scheduler.armed_count(), 0);
}

// ============================================================================
// Creation edge cases
// ============================================================================

#[tokio::test]
async fn zero_delay_creation_publishes_exactly_once() {
    let (scheduler, store, publisher) = setup();
    let admission = scheduler
        .on_item_created(ItemId(3), scheduler.now())
        .await
        .unwrap();

    assert_eq!(admission, Admission::FinalizedImmediately);
    assert_eq!(scheduler.armed_count(), 0);
    assert_eq!(store.status(ItemId(3)).await, Some(LifecycleStatus::Ended));
    assert_eq!(publisher.routing_keys(), vec!["contest.end"]);
}

#[tokio::test(start_paused = true)]
async fn duplicate_creation_keeps_one_row_and_one_timer() {
    let (scheduler, store, publisher) = setup();
    let expires = Utc::now() + ChronoDuration::seconds(5);

    scheduler.on_item_created(ItemId(4), expires).await.unwrap();
    let second = scheduler.on_item_created(ItemId(4), expires).await;

    assert!(matches!(second, Err(SchedulerError::Duplicate(ItemId(4)))));
    assert_eq!(store.inner.len(), 1);
    assert_eq!(scheduler.armed_count(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(publisher.ended_ids(), vec![4]);
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn recovery_ends_item_that_expired_while_down() {
    let (scheduler, store, publisher) = setup();
    seed(&store, 10, ChronoDuration::hours(-1), LifecycleStatus::Pending).await;

    let report = scheduler.on_startup().await.unwrap();

    assert_eq!(report.finalized, 1);
    assert_eq!(store.status(ItemId(10)).await, Some(LifecycleStatus::Ended));
    assert_eq!(publisher.ended_ids(), vec![10]);

    let steps: Vec<_> = store.inner.history(ItemId(10)).into_iter().map(|t| t.to).collect();
    assert_eq!(
        steps,
        vec![LifecycleStatus::Pending, LifecycleStatus::Active, LifecycleStatus::Ended]
    );
}

#[tokio::test(start_paused = true)]
async fn recovery_rearms_future_items_and_activates_pending_ones() {
    let (scheduler, store, publisher) = setup();
    seed(&store, 11, ChronoDuration::seconds(30), LifecycleStatus::Pending).await;
    seed(&store, 12, ChronoDuration::seconds(60), LifecycleStatus::Active).await;

    let report = scheduler.on_startup().await.unwrap();

    assert_eq!(report.rearmed, 2);
    assert_eq!(store.status(ItemId(11)).await, Some(LifecycleStatus::Active));
    assert!(scheduler.is_armed(ItemId(11)));
    assert!(scheduler.is_armed(ItemId(12)));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(publisher.ended_ids(), vec![11]);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(publisher.ended_ids(), vec![11, 12]);
}

#[tokio::test(start_paused = true)]
async fn running_recovery_twice_changes_nothing() {
    let (scheduler, store, publisher) = setup();
    seed(&store, 20, ChronoDuration::minutes(-5), LifecycleStatus::Active).await;
    seed(&store, 21, ChronoDuration::minutes(5), LifecycleStatus::Active).await;

    let first = scheduler.on_startup().await.unwrap();
    let second = scheduler.on_startup().await.unwrap();

    assert_eq!((first.finalized, first.rearmed), (1, 1));
    assert_eq!((second.finalized, second.rearmed, second.skipped), (0, 0, 1));
    assert_eq!(publisher.ended_ids(), vec![20]);
    assert_eq!(scheduler.armed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn recovery_counts_failures_and_continues() {
    let (scheduler, store, publisher) = setup();
    seed(&store, 30, ChronoDuration::minutes(-2), LifecycleStatus::Active).await;
    seed(&store, 31, ChronoDuration::minutes(-1), LifecycleStatus::Active).await;
    store.fail_writes_for(ItemId(30));

    let report = scheduler.on_startup().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.finalized, 1);
    assert_eq!(report.total(), 2);
    assert_eq!(publisher.ended_ids(), vec![31]);
    assert_eq!(store.status(ItemId(30)).await, Some(LifecycleStatus::Active));
}

#[tokio::test]
async fn recovery_aborts_when_store_query_fails() {
    let (scheduler, store, _) = setup();
    store.fail_queries(true);
    assert!(matches!(
        scheduler.on_startup().await,
        Err(SchedulerError::Store(_))
    ));
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn failing_item_does_not_delay_other_timers() {
    let (scheduler, store, publisher) = setup();
    let now = Utc::now();
    scheduler
        .on_item_created(ItemId(40), now + ChronoDuration::seconds(10))
        .await
        .unwrap();
    scheduler
        .on_item_created(ItemId(41), now + ChronoDuration::seconds(10))
        .await
        .unwrap();
    store.fail_writes_for(ItemId(40));

    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(publisher.ended_ids(), vec![41]);
    assert_eq!(store.status(ItemId(40)).await, Some(LifecycleStatus::Active));
    assert_eq!(scheduler.armed_count(), 0);

    // The caller retries once the store recovers.
    store.heal(ItemId(40));
    assert_eq!(scheduler.finalize(ItemId(40)).await.unwrap(), Finalization::Ended);
    assert_eq!(publisher.ended_ids(), vec![41, 40]);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn shutdown_lets_an_ended_write_reach_its_publish() {
    let (scheduler, store, publisher) = setup();
    store.stall_after_ended_write(Duration::from_millis(50));
    let now = Utc::now();
    scheduler
        .on_item_created(ItemId(50), now + ChronoDuration::seconds(1))
        .await
        .unwrap();
    scheduler
        .on_item_created(ItemId(51), now + ChronoDuration::minutes(10))
        .await
        .unwrap();

    // Item 50's timer has stored ENDED and is waiting on the store.
    tokio::time::sleep(Duration::from_millis(1020)).await;
    assert_eq!(store.ended_writes(), 1);
    assert!(publisher.ended_ids().is_empty());

    scheduler.shutdown().await;

    assert_eq!(publisher.ended_ids(), vec![50]);
    assert_eq!(store.status(ItemId(51)).await, Some(LifecycleStatus::Active));
    assert_eq!(scheduler.armed_count(), 0);

    let restarted = Scheduler::new(store.clone(), publisher.clone(), Topology::contests());
    let report = restarted.on_startup().await.unwrap();
    assert_eq!((report.rearmed, report.finalized), (1, 0));
    assert_eq!(publisher.ended_ids(), vec![50]);
    restarted.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn created_event_after_shutdown_is_kept_for_recovery() {
    let (scheduler, store, publisher) = setup();
    scheduler.shutdown().await;
    assert!(scheduler.is_stopped());

    let err = scheduler
        .on_item_created(ItemId(52), Utc::now() - ChronoDuration::seconds(1))
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::Stopped));
    assert!(publisher.ended_ids().is_empty());
    assert_eq!(store.status(ItemId(52)).await, Some(LifecycleStatus::Active));

    let restarted = Scheduler::new(store.clone(), publisher.clone(), Topology::contests());
    assert_eq!(restarted.on_startup().await.unwrap().finalized, 1);
    assert_eq!(publisher.ended_ids(), vec![52]);
}
