//! Webhook configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Webhook system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Maximum delivery attempts per event.
    pub max_attempts: u32,
    /// Timeout of one outbound push, in seconds.
    pub timeout_secs: u64,
    /// How often failed deliveries are re-examined, in seconds.
    pub retry_interval_secs: u64,
    /// Accepted clock skew when verifying signatures, in seconds.
    pub signature_tolerance_secs: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            timeout_secs: 10,
            retry_interval_secs: 60,
            signature_tolerance_secs: 300,
        }
    }
}

impl WebhookConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the push timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the redelivery poll interval in seconds.
    pub fn retry_interval_secs(mut self, secs: u64) -> Self {
        self.retry_interval_secs = secs;
        self
    }

    /// Push timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Redelivery poll interval.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}
