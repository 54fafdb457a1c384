use serde::Serialize;
use tracing::{error, info};

use crate::bus::EventPublisher;
use crate::lock::LockManager;

use super::{LifecycleStore, Reconciliation, Scheduler, SchedulerError};

/// Counts from one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Future deadlines that got a timer again.
    pub rearmed: usize,
    /// Deadlines that passed while the process was down, ended now.
    pub finalized: usize,
    /// Items that needed nothing.
    pub skipped: usize,
    /// Items whose reconciliation failed. Logged with their id.
    pub failed: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.rearmed + self.finalized + self.skipped + self.failed
    }
}

/// Reconciles the store with the clock after a restart.
///
/// Runs before created events are consumed. Running it again without new
/// items in between changes nothing and publishes nothing.
pub struct RecoveryRunner<S, P, L> {
    scheduler: Scheduler<S, P, L>,
}

impl<S, P, L> RecoveryRunner<S, P, L>
where
    S: LifecycleStore,
    P: EventPublisher + 'static,
    L: LockManager + 'static,
{
    pub fn new(scheduler: Scheduler<S, P, L>) -> Self {
        Self { scheduler }
    }

    /// Only a failing store query aborts the pass; per-item failures are
    /// counted and the pass moves on.
    pub async fn run(&self) -> Result<RecoveryReport, SchedulerError> {
        let items = self.scheduler.store().find_unfinished().await?;
        info!(unfinished = items.len(), "recovery started");

        let mut report = RecoveryReport::default();
        for item in items {
            match self.scheduler.reconcile(item.id).await {
                Ok(Reconciliation::Rearmed { .. }) => report.rearmed += 1,
                Ok(Reconciliation::Finalized) => report.finalized += 1,
                Ok(Reconciliation::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(item_id = %item.id, error = %e, "recovery failed for item");
                    report.failed += 1;
                }
            }
        }

        info!(
            rearmed = report.rearmed,
            finalized = report.finalized,
            skipped = report.skipped,
            failed = report.failed,
            "recovery complete"
        );
        Ok(report)
    }
}
