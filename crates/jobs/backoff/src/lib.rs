//! # Franchise Backoff
//!
//! Retry machinery for fragile outbound pushes such as the tax-authority
//! invoice submission:
//! - `delay_for`, a pure escalating delay table (5m, 15m, 45m, 2h, 6h)
//! - `PushWorker`, the resubmission protocol around a unit of work
//! - `JobScheduler`, delayed and recurring jobs with idempotency keys
//! - `RecoveryJob`, the nightly sweep that re-enqueues lost retries
//!
//! ## Example
//!
//! ```rust,ignore
//! use franchise_backoff::{InMemoryTaskStore, PushTask, PushWorker, RecoveryJob, TokioScheduler};
//!
//! let store = Arc::new(InMemoryTaskStore::new());
//! let scheduler = Arc::new(TokioScheduler::new());
//! let worker = PushWorker::new(store.clone(), Arc::new(tax_authority), scheduler.clone());
//!
//! store.insert(PushTask::new("invoice-2031")).await?;
//! worker.run(&task_id).await?;
//!
//! RecoveryJob::new(store, worker).register(scheduler.as_ref()).await?;
//! ```

mod error;
mod policy;
mod recovery;
mod scheduler;
mod task;
mod worker;

pub use error::{BackoffError, BackoffResult};
pub use policy::{DELAY_TABLE, EscalatingBackoff, RetryStrategy, delay_for};
pub use recovery::{RECOVERY_JOB_ID, RecoveryJob, RecoveryReport};
pub use scheduler::{
    JobHandler, JobScheduler, Recurrence, ScheduleOutcome, ScheduledJob, TokioScheduler,
    next_occurrence,
};
pub use task::{InMemoryTaskStore, PushTask, TaskStatus, TaskStore};
pub use worker::{PushFailure, PushOutcome, PushTarget, PushWorker, resubmission_key};
