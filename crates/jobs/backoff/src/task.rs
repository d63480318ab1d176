//! Retryable push tasks and their storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{BackoffError, BackoffResult};

/// Lifecycle of a push task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, never attempted.
    Pending,
    /// A push is running.
    InFlight,
    /// Last push failed; a resubmission is (or should be) scheduled.
    Failed,
    /// Pushed successfully.
    Succeeded,
    /// Out of attempts. Needs an operator.
    Exhausted,
}

/// One unit of outbound work, such as an invoice submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTask {
    /// Task id.
    pub id: String,
    /// Business subject being pushed (invoice id, filing id).
    pub subject_id: String,
    /// Resubmissions made so far.
    pub attempt_number: u32,
    /// Resubmission ceiling.
    pub max_attempts: u32,
    /// Last failure message.
    pub last_error: Option<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Opaque data handed to the push target.
    pub payload: Value,
    /// Created at.
    pub created_at: DateTime<Utc>,
    /// Updated at.
    pub updated_at: DateTime<Utc>,
}

impl PushTask {
    /// Creates a pending task for `subject_id`.
    pub fn new(subject_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.into(),
            attempt_number: 0,
            max_attempts: 5,
            last_error: None,
            status: TaskStatus::Pending,
            payload: Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the resubmission ceiling.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// True once no more resubmissions are allowed.
    pub fn is_out_of_attempts(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }

    /// True for a failed task that still has attempts left.
    pub fn is_recoverable(&self) -> bool {
        self.status == TaskStatus::Failed && !self.is_out_of_attempts()
    }
}

/// Persistence for push tasks.
///
/// `record_failure` must read and bump the attempt number in the same
/// transaction that stores the failure.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Stores a new task.
    async fn insert(&self, task: PushTask) -> BackoffResult<()>;

    /// Gets a task by id.
    async fn get(&self, id: &str) -> BackoffResult<Option<PushTask>>;

    /// Claims a task for a push. Returns None when the task is not in a
    /// runnable state (already running, done, or exhausted).
    async fn mark_in_flight(&self, id: &str) -> BackoffResult<Option<PushTask>>;

    /// Marks a task as pushed.
    async fn mark_succeeded(&self, id: &str) -> BackoffResult<()>;

    /// Marks a task as terminally failed.
    async fn mark_exhausted(&self, id: &str, error: &str) -> BackoffResult<()>;

    /// Records a failed push and advances the attempt number, provided it
    /// still equals `expected_attempt`. Returns None when another handler
    /// got there first.
    async fn record_failure(
        &self,
        id: &str,
        expected_attempt: u32,
        error: &str,
    ) -> BackoffResult<Option<PushTask>>;

    /// Failed tasks that still have attempts left.
    async fn list_recoverable(&self) -> BackoffResult<Vec<PushTask>>;

    /// In-flight tasks last touched before `cutoff`, left behind by a
    /// worker that died mid-push.
    async fn list_stalled(&self, cutoff: DateTime<Utc>) -> BackoffResult<Vec<PushTask>>;
}

/// In-memory task store for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, PushTask>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: &str, apply: F) -> BackoffResult<()>
    where
        F: FnOnce(&mut PushTask) + Send,
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| BackoffError::TaskNotFound(id.to_string()))?;
        apply(task);
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: PushTask) -> BackoffResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(BackoffError::DuplicateTask(task.id));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get(&self, id: &str) -> BackoffResult<Option<PushTask>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn mark_in_flight(&self, id: &str) -> BackoffResult<Option<PushTask>> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| BackoffError::TaskNotFound(id.to_string()))?;

        match task.status {
            TaskStatus::Pending | TaskStatus::Failed => {
                task.status = TaskStatus::InFlight;
                task.updated_at = Utc::now();
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_succeeded(&self, id: &str) -> BackoffResult<()> {
        self.update(id, |task| {
            task.status = TaskStatus::Succeeded;
            task.last_error = None;
        })
        .await
    }

    async fn mark_exhausted(&self, id: &str, error: &str) -> BackoffResult<()> {
        let error = error.to_string();
        self.update(id, move |task| {
            task.status = TaskStatus::Exhausted;
            task.last_error = Some(error);
        })
        .await
    }

    async fn record_failure(
        &self,
        id: &str,
        expected_attempt: u32,
        error: &str,
    ) -> BackoffResult<Option<PushTask>> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| BackoffError::TaskNotFound(id.to_string()))?;

        if task.attempt_number != expected_attempt || task.status != TaskStatus::InFlight {
            return Ok(None);
        }

        task.attempt_number += 1;
        task.status = TaskStatus::Failed;
        task.last_error = Some(error.to_string());
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn list_recoverable(&self) -> BackoffResult<Vec<PushTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().filter(|t| t.is_recoverable()).cloned().collect())
    }

    async fn list_stalled(&self, cutoff: DateTime<Utc>) -> BackoffResult<Vec<PushTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| t.status == TaskStatus::InFlight && t.updated_at < cutoff)
            .cloned()
            .collect())
    }
}
