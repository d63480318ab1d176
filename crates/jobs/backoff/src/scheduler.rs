//! Delayed and recurring jobs.
//!
//! A job is identified by an idempotency key. While a job with a given key
//! is pending, scheduling another one with the same key is a no-op that
//! returns `ScheduleOutcome::Duplicate`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::BackoffResult;

/// A job waiting to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    /// What the job acts on (a task id, or a named job).
    pub identity: String,
    /// Earliest run time.
    pub run_at: DateTime<Utc>,
    /// Deduplication key.
    pub idempotency_key: String,
}

impl ScheduledJob {
    /// Creates a job that runs after `delay`.
    pub fn after(identity: impl Into<String>, delay: Duration, key: impl Into<String>) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));
        Self {
            identity: identity.into(),
            run_at: Utc::now() + delay,
            idempotency_key: key.into(),
        }
    }
}

/// Result of a schedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The job was registered.
    Scheduled,
    /// A job with the same key (or identity) is already registered.
    Duplicate,
}

/// Recurrence rule for repeating jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// Every day at the given UTC time.
    Daily {
        /// Time of day, UTC.
        at: NaiveTime,
    },
    /// At a fixed interval.
    Every(Duration),
}

/// Next run time of `rule` strictly after `now`.
pub fn next_occurrence(rule: &Recurrence, now: DateTime<Utc>) -> DateTime<Utc> {
    match rule {
        Recurrence::Daily { at } => {
            let today = now.date_naive().and_time(*at).and_utc();
            if today > now {
                today
            } else {
                today + chrono::Duration::days(1)
            }
        }
        Recurrence::Every(interval) => {
            let interval = chrono::Duration::from_std(*interval)
                .unwrap_or_else(|_| chrono::Duration::days(1))
                .max(chrono::Duration::seconds(1));
            now + interval
        }
    }
}

/// Code run when a job fires.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the job. Failures are the handler's to log.
    async fn run(&self, job: &ScheduledJob);
}

/// Registers jobs for later execution.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Runs `handler` once at `job.run_at`, unless a job with the same
    /// idempotency key is still pending.
    async fn schedule_once(
        &self,
        job: ScheduledJob,
        handler: Arc<dyn JobHandler>,
    ) -> BackoffResult<ScheduleOutcome>;

    /// Runs `handler` on every occurrence of `rule`. One schedule per
    /// identity.
    async fn schedule_recurring(
        &self,
        identity: &str,
        rule: Recurrence,
        idempotency_key: &str,
        handler: Arc<dyn JobHandler>,
    ) -> BackoffResult<ScheduleOutcome>;
}

type Handles = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

/// In-process scheduler backed by tokio timers.
///
/// Pending jobs are lost on restart; `RecoveryJob` re-enqueues the
/// retries that depended on them.
#[derive(Default)]
pub struct TokioScheduler {
    pending: Handles,
    recurring: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a job with `key` is waiting to run.
    pub async fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().await.contains_key(key)
    }

    /// Number of one-shot jobs waiting to run.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Returns true if a recurring schedule is registered for `identity`.
    pub async fn is_recurring(&self, identity: &str) -> bool {
        self.recurring.lock().await.contains_key(identity)
    }

    /// Cancels every pending and recurring job.
    pub async fn shutdown(&self) {
        for (_, handle) in self.pending.lock().await.drain() {
            handle.abort();
        }
        for (_, handle) in self.recurring.lock().await.drain() {
            handle.abort();
        }
    }
}

fn until(run_at: DateTime<Utc>) -> Duration {
    (run_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

#[async_trait]
impl JobScheduler for TokioScheduler {
    async fn schedule_once(
        &self,
        job: ScheduledJob,
        handler: Arc<dyn JobHandler>,
    ) -> BackoffResult<ScheduleOutcome> {
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&job.idempotency_key) {
            tracing::debug!(key = %job.idempotency_key, "Job already scheduled");
            return Ok(ScheduleOutcome::Duplicate);
        }

        let key = job.idempotency_key.clone();
        let registry = self.pending.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(until(job.run_at)).await;
            // Free the key before running so the handler may schedule the
            // next attempt under a new one.
            registry.lock().await.remove(&job.idempotency_key);
            handler.run(&job).await;
        });

        tracing::debug!(key = %key, "Job scheduled");
        pending.insert(key, handle);
        Ok(ScheduleOutcome::Scheduled)
    }

    async fn schedule_recurring(
        &self,
        identity: &str,
        rule: Recurrence,
        idempotency_key: &str,
        handler: Arc<dyn JobHandler>,
    ) -> BackoffResult<ScheduleOutcome> {
        let mut recurring = self.recurring.lock().await;
        if recurring.contains_key(identity) {
            return Ok(ScheduleOutcome::Duplicate);
        }

        let identity_owned = identity.to_string();
        let key = idempotency_key.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let run_at = next_occurrence(&rule, Utc::now());
                tokio::time::sleep(until(run_at)).await;
                let job = ScheduledJob {
                    identity: identity_owned.clone(),
                    run_at,
                    idempotency_key: key.clone(),
                };
                handler.run(&job).await;
            }
        });

        tracing::info!(identity, ?rule, "Recurring job registered");
        recurring.insert(identity.to_string(), handle);
        Ok(ScheduleOutcome::Scheduled)
    }
}
