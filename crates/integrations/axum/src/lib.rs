//! # Franchise Axum Integration
//!
//! This crate provides the HTTP surface of the resilience layer:
//! - `QuotaLayer`, plan-aware limits on mutating requests
//! - `Caller`, the identity extractor
//! - `webhook_routes`, subscription and delivery management
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use axum::{Router, routing::post};
//! use franchise_axum::{QuotaLayer, webhook_routes};
//!
//! let app = Router::new()
//!     .route("/orders", post(create_order))
//!     .merge(webhook_routes(registry, dispatcher))
//!     .layer(QuotaLayer::new(guard));
//! ```

mod extractor;
mod layer;
mod routes;

pub use extractor::{Caller, ORG_ID_HEADER, SUBJECT_ID_HEADER};
pub use layer::{QuotaLayer, QuotaMiddleware, client_address};
pub use routes::webhook_routes;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use franchise_quota::QuotaError;
use franchise_webhooks::WebhookError;

/// Error type of every handler and middleware in this crate.
///
/// Renders as `{statusCode, error, message}`.
#[derive(Debug)]
pub enum ApiError {
    /// Quota guard failure.
    Quota(QuotaError),
    /// Webhook operation failure.
    Webhook(WebhookError),
    /// The caller acts for no organization.
    MissingOrganization,
}

impl ApiError {
    /// HTTP status for the error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Quota(QuotaError::AuthRequired) => StatusCode::UNAUTHORIZED,
            ApiError::MissingOrganization => StatusCode::FORBIDDEN,
            ApiError::Webhook(err) => match err {
                WebhookError::Validation(_) | WebhookError::InvalidPayload(_) => {
                    StatusCode::BAD_REQUEST
                }
                WebhookError::Unauthorized => StatusCode::FORBIDDEN,
                WebhookError::SubscriptionNotFound(_) | WebhookError::DeliveryNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                WebhookError::RetrySuccessfulDelivery | WebhookError::MaxAttemptsExceeded => {
                    StatusCode::CONFLICT
                }
                WebhookError::Http(_) | WebhookError::Timeout => StatusCode::BAD_GATEWAY,
                WebhookError::Storage(_) | WebhookError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Quota(err) => err.to_string(),
            ApiError::MissingOrganization => "Organization context required".to_string(),
            ApiError::Webhook(WebhookError::Storage(_) | WebhookError::Internal(_)) => {
                "Internal server error".to_string()
            }
            ApiError::Webhook(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        }

        let body = serde_json::json!({
            "statusCode": status.as_u16(),
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": self.message(),
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<QuotaError> for ApiError {
    fn from(err: QuotaError) -> Self {
        ApiError::Quota(err)
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::Webhook(err)
    }
}
