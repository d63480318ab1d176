//! Caller identity extractor for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use franchise_quota::{QuotaError, Subject};

use crate::ApiError;

/// Header carrying the authenticated subject id from a trusted upstream.
pub const SUBJECT_ID_HEADER: &str = "x-subject-id";
/// Header carrying the caller's organization from a trusted upstream.
pub const ORG_ID_HEADER: &str = "x-org-id";

/// The authenticated caller.
///
/// Taken from request extensions when upstream authentication put it
/// there, otherwise from the `X-Subject-Id` / `X-Org-Id` headers. Rejects
/// with 401 when neither is present.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(caller: Caller) -> String {
///     format!("Hello, {}!", caller.subject_id)
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// User or API client id.
    pub subject_id: String,
    /// Organization the caller acts for.
    pub org_id: Option<String>,
}

impl Caller {
    /// Creates a caller without an organization.
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            org_id: None,
        }
    }

    /// Sets the organization.
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Finds the caller of a request, if any.
    pub fn from_request(extensions: &Extensions, headers: &HeaderMap) -> Option<Self> {
        if let Some(caller) = extensions.get::<Caller>() {
            return Some(caller.clone());
        }

        let subject_id = header_value(headers, SUBJECT_ID_HEADER)?;
        Some(Self {
            subject_id,
            org_id: header_value(headers, ORG_ID_HEADER),
        })
    }

    /// Organization of the caller, required by org-scoped routes.
    pub fn org(&self) -> Result<&str, ApiError> {
        self.org_id.as_deref().ok_or(ApiError::MissingOrganization)
    }

    /// Identity as seen by the quota guard.
    pub fn subject(&self) -> Subject {
        let subject = Subject::new(self.subject_id.clone());
        match &self.org_id {
            Some(org) => subject.with_org(org.clone()),
            None => subject,
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Caller::from_request(&parts.extensions, &parts.headers)
            .ok_or(ApiError::Quota(QuotaError::AuthRequired))
    }
}
