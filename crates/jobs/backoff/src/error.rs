//! Backoff error types.

use thiserror::Error;

/// Result type for backoff operations.
pub type BackoffResult<T> = Result<T, BackoffError>;

/// Error type for the push retry machinery.
#[derive(Debug, Error)]
pub enum BackoffError {
    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Task already exists.
    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    /// Task store failure.
    #[error("Task store error: {0}")]
    Storage(String),

    /// Scheduler failure.
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}
