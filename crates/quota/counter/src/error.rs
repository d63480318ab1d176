//! Counter store error types.

use thiserror::Error;

/// Result type for counter store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type for counter store operations.
///
/// Never surfaced to end users: the quota policy layer turns any of these
/// into a fail-open decision.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The remote store could not be reached.
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// The remote store did not answer in time.
    #[error("Counter store timed out after {0}ms")]
    Timeout(u64),

    /// The remote store answered with something unexpected.
    #[error("Unexpected counter store reply: {0}")]
    InvalidReply(String),
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(0)
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::InvalidReply(err.to_string())
        }
    }
}
