//! Quota configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::plan::PlanTier;

/// Limits enforced by the quota guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Window length in seconds.
    pub window_secs: u64,
    /// Requests per window for the free plan.
    pub free: u64,
    /// Requests per window for the pro plan.
    pub pro: u64,
    /// Requests per window for the enterprise plan.
    pub enterprise: u64,
    /// Requests per window from one source address, regardless of plan.
    pub address_ceiling: u64,
    /// Upper bound for the plan lookup in milliseconds.
    pub plan_lookup_timeout_ms: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            free: 10,
            pro: 60,
            enterprise: 240,
            address_ceiling: 120,
            plan_lookup_timeout_ms: 500,
        }
    }
}

impl QuotaConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-subject quota for a plan.
    pub fn limit_for(&self, plan: PlanTier) -> u64 {
        match plan {
            PlanTier::Free => self.free,
            PlanTier::Pro => self.pro,
            PlanTier::Enterprise => self.enterprise,
        }
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Plan lookup timeout.
    pub fn plan_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.plan_lookup_timeout_ms)
    }

    /// Sets the address ceiling.
    pub fn address_ceiling(mut self, ceiling: u64) -> Self {
        self.address_ceiling = ceiling;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let config = QuotaConfig::default();
        assert_eq!(config.limit_for(PlanTier::Free), 10);
        assert_eq!(config.limit_for(PlanTier::Pro), 60);
        assert_eq!(config.limit_for(PlanTier::Enterprise), 240);
        assert_eq!(config.address_ceiling, 120);
        assert_eq!(config.window(), Duration::from_secs(60));
    }
}
