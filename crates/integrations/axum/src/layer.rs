//! Quota middleware layer for Axum.

use axum::body::Body;
use axum::extract::{ConnectInfo, MatchedPath};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use franchise_quota::{Admission, Decision, Denial, QuotaGuard};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::ApiError;
use crate::extractor::Caller;

/// Layer that applies plan quotas to mutating requests.
///
/// `GET`, `HEAD` and `OPTIONS` pass through untouched. Apply it with
/// `Router::layer` so the matched route template is available.
///
/// The source address is the connection peer unless
/// [`trust_forwarded_headers`](Self::trust_forwarded_headers) is enabled.
#[derive(Clone)]
pub struct QuotaLayer {
    guard: Arc<QuotaGuard>,
    trust_forwarded: bool,
}

impl QuotaLayer {
    /// Creates a new quota layer.
    pub fn new(guard: Arc<QuotaGuard>) -> Self {
        Self {
            guard,
            trust_forwarded: false,
        }
    }

    /// Reads the source address from `X-Forwarded-For` / `X-Real-IP`.
    ///
    /// Only enable behind a reverse proxy that sets these headers.
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }
}

impl<S> Layer<S> for QuotaLayer {
    type Service = QuotaMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        QuotaMiddleware {
            inner,
            guard: self.guard.clone(),
            trust_forwarded: self.trust_forwarded,
        }
    }
}

/// Middleware service that admits or rejects requests.
#[derive(Clone)]
pub struct QuotaMiddleware<S> {
    inner: S,
    guard: Arc<QuotaGuard>,
    trust_forwarded: bool,
}

impl<S> Service<Request<Body>> for QuotaMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let guard = self.guard.clone();
        let mut inner = self.inner.clone();
        let trust_forwarded = self.trust_forwarded;

        Box::pin(async move {
            if !is_mutating(req.method()) {
                return inner.call(req).await;
            }

            let route = req
                .extensions()
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| req.uri().path().to_string());
            let subject = Caller::from_request(req.extensions(), req.headers()).map(|c| c.subject());
            let source = client_address(&req, trust_forwarded).unwrap_or_else(|| "unknown".to_string());

            match guard.admit(subject.as_ref(), &source, &route).await {
                Ok(Decision::Allow(admission)) => {
                    let mut response = inner.call(req).await?;
                    add_quota_headers(response.headers_mut(), &admission, guard.config().window_secs);
                    Ok(response)
                }
                Ok(Decision::Deny(denial)) => Ok(too_many_requests(&denial)),
                Err(e) => Ok(ApiError::from(e).into_response()),
            }
        })
    }
}

fn is_mutating(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Extracts the client address of a request.
///
/// With `trust_forwarded`, checks in order:
/// 1. X-Forwarded-For header (last IP in chain, the one our proxy appended)
/// 2. X-Real-IP header
/// 3. Peer address from connection
///
/// Otherwise only the peer address is used; client-supplied headers are
/// ignored.
pub fn client_address(req: &Request<Body>, trust_forwarded: bool) -> Option<String> {
    if trust_forwarded {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').next())
            .map(str::trim);
        if let Some(ip) = forwarded.filter(|ip| ip.parse::<IpAddr>().is_ok()) {
            return Some(ip.to_string());
        }

        let real_ip = req
            .headers()
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim);
        if let Some(ip) = real_ip.filter(|ip| ip.parse::<IpAddr>().is_ok()) {
            return Some(ip.to_string());
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn too_many_requests(denial: &Denial) -> Response<Body> {
    let body = serde_json::json!({
        "statusCode": 429,
        "message": "Rate limit exceeded",
        "plan": denial.plan,
        "limit": denial.limit,
        "window": denial.window,
        "retryAfter": denial.retry_after,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    let headers = response.headers_mut();
    insert_header(headers, header::RETRY_AFTER, denial.retry_after.to_string());
    insert_header(headers, X_RATELIMIT_LIMIT, denial.limit.to_string());
    insert_header(headers, X_RATELIMIT_WINDOW, denial.window.to_string());
    insert_header(headers, X_RATELIMIT_PLAN, denial.plan.as_str().to_string());
    response
}

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");
const X_RATELIMIT_PLAN: HeaderName = HeaderName::from_static("x-ratelimit-plan");

fn add_quota_headers(headers: &mut HeaderMap, admission: &Admission, window_secs: u64) {
    insert_header(headers, X_RATELIMIT_LIMIT, admission.limit.to_string());
    insert_header(headers, X_RATELIMIT_WINDOW, window_secs.to_string());
    insert_header(headers, X_RATELIMIT_PLAN, admission.plan.as_str().to_string());
    if let Some(remaining) = admission.remaining {
        insert_header(headers, X_RATELIMIT_REMAINING, remaining.to_string());
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}
