//! Resubmission protocol around a fragile push.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::BackoffResult;
use crate::policy::delay_for;
use crate::scheduler::{JobHandler, JobScheduler, ScheduleOutcome, ScheduledJob};
use crate::task::{PushTask, TaskStore};

/// Failure reported by a push target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PushFailure(pub String);

impl PushFailure {
    /// Creates a failure from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The external system a task is pushed to.
#[async_trait]
pub trait PushTarget: Send + Sync {
    /// Performs one push of `task`.
    async fn push(&self, task: &PushTask) -> Result<(), PushFailure>;
}

/// What happened to a task after one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The push went through.
    Succeeded,
    /// The push failed and resubmission `attempt` runs after `delay`.
    Rescheduled {
        /// Attempt number of the resubmission.
        attempt: u32,
        /// Wait before it runs.
        delay: Duration,
    },
    /// The push failed with no attempts left.
    Exhausted,
    /// Nothing to do: the task was not runnable or another handler
    /// already recorded this attempt.
    Skipped,
}

/// Idempotency key of resubmission `attempt` of `task_id`.
pub fn resubmission_key(task_id: &str, attempt: u32) -> String {
    format!("push:{task_id}:{attempt}")
}

/// Runs push tasks and schedules their resubmissions.
#[derive(Clone)]
pub struct PushWorker {
    store: Arc<dyn TaskStore>,
    target: Arc<dyn PushTarget>,
    scheduler: Arc<dyn JobScheduler>,
    timeout: Duration,
}

impl PushWorker {
    /// Creates a worker with a 30 second push timeout.
    pub fn new(
        store: Arc<dyn TaskStore>,
        target: Arc<dyn PushTarget>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Self {
        Self {
            store,
            target,
            scheduler,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the push timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Gets the task store.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Upper bound of one push.
    pub fn push_timeout(&self) -> Duration {
        self.timeout
    }

    /// Schedules resubmission `attempt` of `task_id` after `delay_for(attempt)`.
    pub async fn schedule_resubmission(
        &self,
        task_id: &str,
        attempt: u32,
    ) -> BackoffResult<ScheduleOutcome> {
        let delay = delay_for(attempt);
        let job = ScheduledJob::after(task_id, delay, resubmission_key(task_id, attempt));
        self.scheduler
            .schedule_once(job, Arc::new(self.clone()))
            .await
    }

    /// Pushes a task once.
    ///
    /// On failure either marks the task exhausted or records the failure
    /// and schedules the next attempt.
    pub async fn run(&self, task_id: &str) -> BackoffResult<PushOutcome> {
        let Some(task) = self.store.mark_in_flight(task_id).await? else {
            tracing::debug!(task_id, "Task not runnable, skipping");
            return Ok(PushOutcome::Skipped);
        };

        let result = match tokio::time::timeout(self.timeout, self.target.push(&task)).await {
            Ok(result) => result,
            Err(_) => Err(PushFailure(format!(
                "push timed out after {}s",
                self.timeout.as_secs()
            ))),
        };

        let failure = match result {
            Ok(()) => {
                self.store.mark_succeeded(task_id).await?;
                tracing::info!(
                    task_id,
                    subject_id = %task.subject_id,
                    attempt = task.attempt_number,
                    "Push succeeded"
                );
                return Ok(PushOutcome::Succeeded);
            }
            Err(failure) => failure,
        };

        self.handle_failure(&task, failure).await
    }

    /// Settles a task whose worker died mid-push. The interrupted push
    /// counts as a failed attempt.
    pub async fn reclaim(&self, task: &PushTask) -> BackoffResult<PushOutcome> {
        tracing::warn!(
            task_id = %task.id,
            attempt = task.attempt_number,
            since = %task.updated_at,
            "Reclaiming stalled push"
        );
        self.handle_failure(task, PushFailure::new("push interrupted before completion"))
            .await
    }

    async fn handle_failure(
        &self,
        task: &PushTask,
        failure: PushFailure,
    ) -> BackoffResult<PushOutcome> {
        let task_id = task.id.as_str();

        if task.is_out_of_attempts() {
            self.store.mark_exhausted(task_id, &failure.0).await?;
            tracing::error!(
                task_id,
                subject_id = %task.subject_id,
                attempts = task.attempt_number,
                error = %failure,
                "Push exhausted all retries, operator action required"
            );
            return Ok(PushOutcome::Exhausted);
        }

        let Some(updated) = self
            .store
            .record_failure(task_id, task.attempt_number, &failure.0)
            .await?
        else {
            tracing::debug!(task_id, "Attempt already recorded by another handler");
            return Ok(PushOutcome::Skipped);
        };

        let attempt = updated.attempt_number;
        let delay = delay_for(attempt);
        self.schedule_resubmission(task_id, attempt).await?;

        tracing::warn!(
            task_id,
            subject_id = %task.subject_id,
            attempt,
            delay_secs = delay.as_secs(),
            error = %failure,
            "Push failed, resubmission scheduled"
        );
        Ok(PushOutcome::Rescheduled { attempt, delay })
    }
}

#[async_trait]
impl JobHandler for PushWorker {
    async fn run(&self, job: &ScheduledJob) {
        if let Err(e) = PushWorker::run(self, &job.identity).await {
            tracing::error!(
                task_id = %job.identity,
                key = %job.idempotency_key,
                error = %e,
                "Push job failed"
            );
        }
    }
}
