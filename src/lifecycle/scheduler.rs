use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::bus::EventPublisher;
use crate::lock::{InMemoryLockManager, LockManager};

use super::{
    Clock, ItemEnded, ItemId, LifecycleItem, LifecycleStatus, LifecycleStore, RecoveryReport,
    RecoveryRunner, SchedulerError, SystemClock, Topology,
};

/// What [`Scheduler::on_item_created`] did with a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A timer will finalize the item after `delay`.
    Armed { delay: Duration },
    /// The deadline had already passed; the item was ended in the same call.
    FinalizedImmediately,
    /// The item ended earlier. Nothing changed.
    AlreadyEnded,
}

/// Result of [`Scheduler::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// This call ended the item and published the ended event.
    Ended,
    /// Someone else got there first.
    AlreadyEnded,
}

/// What [`Scheduler::reconcile`] did with a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Rearmed { delay: Duration },
    Finalized,
    /// Already ended, or a timer is already armed.
    Skipped,
}

struct Timer {
    generation: u64,
    handle: AbortHandle,
    /// The sleep is over and the task is ending the item. Never aborted
    /// from here on.
    fired: bool,
}

/// Pending timers by item id, at most one per id, plus the shutdown gate
/// that every ended write passes through.
#[derive(Default)]
struct TimerSet {
    timers: Mutex<HashMap<ItemId, Timer>>,
    generations: AtomicU64,
    stopped: AtomicBool,
    in_flight: AtomicUsize,
    settled: Notify,
}

impl TimerSet {
    fn lock(&self) -> MutexGuard<'_, HashMap<ItemId, Timer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm a timer for `id` unless one exists or the set is stopped.
    /// `spawn` receives the timer's generation and runs while the set is
    /// locked, so the task cannot release its entry before it is recorded.
    fn arm_with(&self, id: ItemId, spawn: impl FnOnce(u64) -> AbortHandle) -> bool {
        let mut timers = self.lock();
        if self.stopped.load(Ordering::SeqCst) || timers.contains_key(&id) {
            return false;
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let handle = spawn(generation);
        timers.insert(
            id,
            Timer {
                generation,
                handle,
                fired: false,
            },
        );
        true
    }

    /// Called by a timer task when its sleep completes. False means the
    /// timer was disarmed or aborted meanwhile and must not act.
    fn mark_fired(&self, id: ItemId, generation: u64) -> bool {
        match self.lock().get_mut(&id) {
            Some(timer) if timer.generation == generation => {
                timer.fired = true;
                true
            }
            _ => false,
        }
    }

    /// Called by a timer task once it has run.
    fn release(&self, id: ItemId, generation: u64) {
        let mut timers = self.lock();
        if timers.get(&id).is_some_and(|t| t.generation == generation) {
            timers.remove(&id);
        }
    }

    /// Forget the timer for an ended item. A timer still sleeping is
    /// aborted.
    fn disarm(&self, id: ItemId) {
        if let Some(timer) = self.lock().remove(&id) {
            if !timer.fired {
                timer.handle.abort();
            }
        }
    }

    fn contains(&self, id: ItemId) -> bool {
        self.lock().contains_key(&id)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Stop arming and abort every sleeping timer. Fired timers keep their
    /// entries and finish on their own.
    fn stop(&self) -> usize {
        self.stopped.store(true, Ordering::SeqCst);
        let mut timers = self.lock();
        let before = timers.len();
        timers.retain(|_, timer| {
            if !timer.fired {
                timer.handle.abort();
            }
            timer.fired
        });
        before - timers.len()
    }

    /// Admit one ended write. Refused once stopped.
    fn enter(self: &Arc<Self>) -> Option<InFlight> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let pass = InFlight(Arc::clone(self));
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        Some(pass)
    }

    /// Resolves once no ended write is in progress. Only meaningful after
    /// [`TimerSet::stop`], when no new ones can start.
    async fn settle(&self) {
        loop {
            let settled = self.settled.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            settled.await;
        }
    }
}

/// An admitted ended write. Dropping it, also by cancellation, lets
/// [`TimerSet::settle`] move on.
struct InFlight(Arc<TimerSet>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.settled.notify_waiters();
        }
    }
}

/// Drives items from created to ended.
///
/// Every status check-and-set for an item happens under that item's lock,
/// so a timer, a duplicate created event and recovery can race on the same
/// id and the stored status still decides exactly one winner. Ending an
/// item persists `ENDED` first and publishes the ended event second.
///
/// Clones share timers, store and publisher.
pub struct Scheduler<S, P, L = InMemoryLockManager> {
    store: Arc<S>,
    publisher: Arc<P>,
    locks: Arc<L>,
    clock: Arc<dyn Clock>,
    topology: Arc<Topology>,
    timers: Arc<TimerSet>,
}

impl<S, P, L> Clone for Scheduler<S, P, L> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            publisher: Arc::clone(&self.publisher),
            locks: Arc::clone(&self.locks),
            clock: Arc::clone(&self.clock),
            topology: Arc::clone(&self.topology),
            timers: Arc::clone(&self.timers),
        }
    }
}

impl<S, P> Scheduler<S, P>
where
    S: LifecycleStore,
    P: EventPublisher + 'static,
{
    pub fn new(store: S, publisher: P, topology: Topology) -> Self {
        Self {
            store: Arc::new(store),
            publisher: Arc::new(publisher),
            locks: Arc::new(InMemoryLockManager::new()),
            clock: Arc::new(SystemClock),
            topology: Arc::new(topology),
            timers: Arc::new(TimerSet::default()),
        }
    }
}

impl<S, P, L> Scheduler<S, P, L>
where
    S: LifecycleStore,
    P: EventPublisher + 'static,
    L: LockManager + 'static,
{
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Swap the per-item lock implementation. Call before arming anything.
    pub fn with_lock_manager<L2: LockManager + 'static>(self, locks: L2) -> Scheduler<S, P, L2> {
        Scheduler {
            store: self.store,
            publisher: self.publisher,
            locks: Arc::new(locks),
            clock: self.clock,
            topology: self.topology,
            timers: self.timers,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Number of timers currently pending.
    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    pub fn is_armed(&self, id: ItemId) -> bool {
        self.timers.contains(id)
    }

    /// Handle an item created event.
    ///
    /// Persists the item as `PENDING`, moves it to `ACTIVE` and arms one
    /// timer for the remaining time. A deadline at or before now ends the
    /// item right here instead. A second created event for a running item
    /// fails with [`SchedulerError::Duplicate`] and leaves the first one
    /// untouched.
    pub async fn on_item_created(
        &self,
        id: ItemId,
        expires_at: DateTime<Utc>,
    ) -> Result<Admission, SchedulerError> {
        let guard = self.locks.acquire(&id.lock_key()).await?;
        let admission = self.admit_locked(id, expires_at).await;
        drop(guard);
        self.locks.prune();
        admission
    }

    async fn admit_locked(
        &self,
        id: ItemId,
        expires_at: DateTime<Utc>,
    ) -> Result<Admission, SchedulerError> {
        if let Some(existing) = self.store.get(id).await? {
            if existing.status.is_terminal() {
                debug!(item_id = %id, "created event for ended item ignored");
                return Ok(Admission::AlreadyEnded);
            }
            warn!(item_id = %id, status = %existing.status, "duplicate created event");
            return Err(SchedulerError::Duplicate(id));
        }

        let now = self.clock.now();
        self.store
            .insert(LifecycleItem::pending(id, expires_at, now))
            .await?;
        self.store.update_status(id, LifecycleStatus::Active).await?;

        match delay_until(expires_at, now) {
            Some(delay) => {
                if !self.arm(id, delay) {
                    return Err(SchedulerError::Stopped);
                }
                info!(item_id = %id, %expires_at, delay_ms = delay.as_millis() as u64, "item scheduled");
                Ok(Admission::Armed { delay })
            }
            None => {
                self.finalize_locked(id).await?;
                Ok(Admission::FinalizedImmediately)
            }
        }
    }

    /// End an item: persist `ENDED`, then publish the ended event.
    ///
    /// Idempotent. Concurrent and repeated calls for one id produce one
    /// write and one publish; the rest return
    /// [`Finalization::AlreadyEnded`].
    pub async fn finalize(&self, id: ItemId) -> Result<Finalization, SchedulerError> {
        let guard = self.locks.acquire(&id.lock_key()).await?;
        let outcome = self.finalize_locked(id).await;
        drop(guard);
        self.locks.prune();
        outcome
    }

    // Caller holds the item lock.
    async fn finalize_locked(&self, id: ItemId) -> Result<Finalization, SchedulerError> {
        let item = self
            .store
            .get(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?;
        if item.status.is_terminal() {
            self.timers.disarm(id);
            return Ok(Finalization::AlreadyEnded);
        }

        // Held from the ENDED write until the publish returns.
        let _pass = self.timers.enter().ok_or(SchedulerError::Stopped)?;
        let payload = serde_json::to_vec(&ItemEnded { id })?;
        self.store.update_status(id, LifecycleStatus::Ended).await?;
        self.timers.disarm(id);

        self.publisher
            .publish(&self.topology.exchange, &self.topology.ended_key, payload)
            .map_err(|e| {
                error!(item_id = %id, error = %e, "item ended but the ended event was not published");
                e
            })?;
        info!(item_id = %id, routing_key = %self.topology.ended_key, "item ended");
        Ok(Finalization::Ended)
    }

    /// Bring one stored item in line with the clock: end it if overdue,
    /// otherwise make sure it is `ACTIVE` with a timer armed.
    pub async fn reconcile(&self, id: ItemId) -> Result<Reconciliation, SchedulerError> {
        let guard = self.locks.acquire(&id.lock_key()).await?;
        let outcome = self.reconcile_locked(id).await;
        drop(guard);
        self.locks.prune();
        outcome
    }

    async fn reconcile_locked(&self, id: ItemId) -> Result<Reconciliation, SchedulerError> {
        let item = self
            .store
            .get(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?;
        if item.status.is_terminal() {
            return Ok(Reconciliation::Skipped);
        }

        // Every item passes through ACTIVE, overdue or not.
        if item.status == LifecycleStatus::Pending {
            self.store.update_status(id, LifecycleStatus::Active).await?;
        }
        let Some(delay) = delay_until(item.expires_at, self.clock.now()) else {
            self.finalize_locked(id).await?;
            return Ok(Reconciliation::Finalized);
        };
        if self.arm(id, delay) {
            debug!(item_id = %id, delay_ms = delay.as_millis() as u64, "timer re-armed");
            Ok(Reconciliation::Rearmed { delay })
        } else if self.is_stopped() {
            Err(SchedulerError::Stopped)
        } else {
            Ok(Reconciliation::Skipped)
        }
    }

    /// Reconcile every unfinished item. Run once at startup, before
    /// subscribing to created events.
    pub async fn on_startup(&self) -> Result<RecoveryReport, SchedulerError> {
        RecoveryRunner::new(self.clone()).run().await
    }

    /// Stop the scheduler. Sleeping timers are aborted and nothing new is
    /// armed or ended; an ended write already under way runs through its
    /// publish before this returns. Stored items are left for recovery on
    /// the next start.
    pub async fn shutdown(&self) {
        let aborted = self.timers.stop();
        self.timers.settle().await;
        if aborted > 0 {
            info!(aborted, "scheduler stopped with pending timers");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.timers.stopped.load(Ordering::SeqCst)
    }

    fn arm(&self, id: ItemId, delay: Duration) -> bool {
        self.timers.arm_with(id, |generation| {
            let scheduler = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !scheduler.timers.mark_fired(id, generation) {
                    return;
                }
                match scheduler.finalize(id).await {
                    Ok(Finalization::Ended) => {}
                    Ok(Finalization::AlreadyEnded) => {
                        debug!(item_id = %id, "timer fired for ended item")
                    }
                    Err(SchedulerError::Stopped) => {
                        debug!(item_id = %id, "timer fired after shutdown; left for recovery")
                    }
                    Err(e) => error!(item_id = %id, error = %e, "timer failed to end item"),
                }
                scheduler.timers.release(id, generation);
            })
            .abort_handle()
        })
    }
}

/// Time left until `deadline`, or `None` if it is not in the future.
fn delay_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (deadline - now).to_std().ok().filter(|delay| !delay.is_zero())
}
