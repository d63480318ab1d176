//! Webhook error types.

use thiserror::Error;

/// Result type for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Error type for webhook operations.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Invalid input (URL, event types, state transition).
    #[error("{0}")]
    Validation(String),

    /// The resource belongs to another organization.
    #[error("Not authorized to access this resource")]
    Unauthorized,

    /// Subscription not found.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Delivery not found.
    #[error("Delivery not found: {0}")]
    DeliveryNotFound(String),

    /// Retry requested for a delivered event.
    #[error("cannot retry successful delivery")]
    RetrySuccessfulDelivery,

    /// Retry requested past the attempt ceiling.
    #[error("maximum retry attempts exceeded")]
    MaxAttemptsExceeded,

    /// HTTP error while pushing.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Push timed out.
    #[error("Request timeout")]
    Timeout,

    /// Invalid payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        WebhookError::Validation(message.into())
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::InvalidPayload(err.to_string())
    }
}

#[cfg(feature = "http-client")]
impl From<reqwest::Error> for WebhookError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WebhookError::Timeout
        } else {
            WebhookError::Http(err.to_string())
        }
    }
}
