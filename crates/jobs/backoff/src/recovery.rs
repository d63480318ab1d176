//! Nightly recovery of lost resubmissions.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use std::sync::Arc;

use crate::error::BackoffResult;
use crate::scheduler::{JobHandler, JobScheduler, Recurrence, ScheduleOutcome, ScheduledJob};
use crate::task::TaskStore;
use crate::worker::{PushOutcome, PushWorker};

/// Name of the recurring recovery job.
pub const RECOVERY_JOB_ID: &str = "push-recovery";

/// Counts from one recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tasks found in a recoverable state.
    pub found: usize,
    /// Resubmissions newly scheduled.
    pub scheduled: usize,
    /// Tasks whose resubmission was already pending.
    pub duplicates: usize,
    /// Stalled in-flight tasks settled as a failed attempt.
    pub reclaimed: usize,
    /// Stalled in-flight tasks that had no attempts left.
    pub exhausted: usize,
}

/// Re-enqueues failed tasks whose delayed job was lost, and settles
/// in-flight tasks abandoned by a crashed worker.
pub struct RecoveryJob {
    store: Arc<dyn TaskStore>,
    worker: PushWorker,
}

impl RecoveryJob {
    /// Creates the job.
    pub fn new(store: Arc<dyn TaskStore>, worker: PushWorker) -> Self {
        Self { store, worker }
    }

    /// Runs one sweep.
    pub async fn run_once(&self) -> BackoffResult<RecoveryReport> {
        self.run_at(Utc::now()).await
    }

    /// Runs one sweep as of `now`.
    ///
    /// In-flight tasks untouched for longer than the push timeout are
    /// treated as a failed attempt. Failed tasks are rescheduled under the
    /// same idempotency key as the worker, so a resubmission that is still
    /// pending is left alone.
    pub async fn run_at(&self, now: DateTime<Utc>) -> BackoffResult<RecoveryReport> {
        let timeout = chrono::Duration::from_std(self.worker.push_timeout())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let stalled = self.store.list_stalled(now - timeout).await?;

        let mut reclaimed = 0;
        let mut exhausted = 0;
        for task in stalled {
            match self.worker.reclaim(&task).await? {
                PushOutcome::Exhausted => exhausted += 1,
                PushOutcome::Rescheduled { .. } => reclaimed += 1,
                PushOutcome::Succeeded | PushOutcome::Skipped => {}
            }
        }

        let tasks = self.store.list_recoverable().await?;
        let mut report = RecoveryReport {
            found: tasks.len(),
            reclaimed,
            exhausted,
            ..Default::default()
        };

        for task in tasks {
            let attempt = task.attempt_number.max(1);
            match self.worker.schedule_resubmission(&task.id, attempt).await? {
                ScheduleOutcome::Scheduled => report.scheduled += 1,
                ScheduleOutcome::Duplicate => report.duplicates += 1,
            }
        }

        tracing::info!(
            found = report.found,
            scheduled = report.scheduled,
            duplicates = report.duplicates,
            reclaimed = report.reclaimed,
            exhausted = report.exhausted,
            "Push recovery sweep finished"
        );
        Ok(report)
    }

    /// Registers the sweep to run daily at 02:00 UTC.
    pub async fn register(self, scheduler: &dyn JobScheduler) -> BackoffResult<ScheduleOutcome> {
        let at = NaiveTime::MIN + chrono::Duration::hours(2);
        scheduler
            .schedule_recurring(
                RECOVERY_JOB_ID,
                Recurrence::Daily { at },
                "push-recovery:nightly",
                Arc::new(self),
            )
            .await
    }
}

#[async_trait]
impl JobHandler for RecoveryJob {
    async fn run(&self, _job: &ScheduledJob) {
        if let Err(e) = self.run_once().await {
            tracing::error!(error = %e, "Push recovery sweep failed");
        }
    }
}
