//! Outbound HTTP transport.

use async_trait::async_trait;

use crate::error::WebhookResult;

/// A signed push ready to send.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Target URL.
    pub url: String,
    /// Headers, including the signature headers.
    pub headers: Vec<(String, String)>,
    /// Raw JSON body, exactly as signed.
    pub body: String,
}

impl OutboundRequest {
    /// Returns the value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Sends pushes to subscribers.
///
/// Any received response is `Ok`; the caller decides whether its status
/// counts as delivered. Network failures and timeouts are `Err`.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Sends the request and returns the response status.
    async fn send(&self, request: &OutboundRequest) -> WebhookResult<u16>;
}

#[cfg(feature = "http-client")]
pub use client::HttpTransport;

#[cfg(feature = "http-client")]
mod client {
    use super::*;
    use crate::error::WebhookError;
    use std::time::Duration;

    /// `reqwest` transport. Redirects are not followed.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: reqwest::Client,
    }

    impl HttpTransport {
        /// Creates a transport with the given per-request timeout.
        pub fn new(timeout: Duration) -> WebhookResult<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .redirect(reqwest::redirect::Policy::none())
                .user_agent(concat!("franchise-webhooks/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| WebhookError::Internal(format!("HTTP client: {e}")))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl WebhookTransport for HttpTransport {
        async fn send(&self, request: &OutboundRequest) -> WebhookResult<u16> {
            let mut builder = self
                .client
                .post(&request.url)
                .header("Content-Type", "application/json");

            for (key, value) in &request.headers {
                builder = builder.header(key, value);
            }

            let response = builder.body(request.body.clone()).send().await?;
            Ok(response.status().as_u16())
        }
    }
}
