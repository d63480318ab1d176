//! Quota error types.

use thiserror::Error;

/// Result type for quota operations.
pub type QuotaResult<T> = Result<T, QuotaError>;

/// Error type for quota admission.
///
/// Store failures are absent on purpose: they resolve to an allow
/// decision inside the guard.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuotaError {
    /// The request carries no authenticated subject.
    #[error("Authentication required for rate-limited endpoints")]
    AuthRequired,
}
