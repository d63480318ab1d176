//! Plan tiers and their lookup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Subscription plan tier of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Default tier, also used when the lookup fails.
    #[default]
    Free,
    /// Paid tier.
    Pro,
    /// Contract tier.
    Enterprise,
}

impl PlanTier {
    /// Lowercase name used in headers and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = PlanLookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            "enterprise" => Ok(PlanTier::Enterprise),
            other => Err(PlanLookupError::UnknownPlan(other.to_string())),
        }
    }
}

/// Plan lookup failure. The guard treats every variant as `free`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanLookupError {
    /// The organization has no active subscription.
    #[error("No active subscription for organization {0}")]
    NoSubscription(String),

    /// The subscription references a plan this layer does not know.
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    /// The backing lookup failed.
    #[error("Plan lookup failed: {0}")]
    Backend(String),
}

/// Resolves the plan tier of an organization.
///
/// Called on every admission; implementations must not cache across
/// calls, since plan changes take effect immediately.
#[async_trait]
pub trait PlanResolver: Send + Sync {
    /// Looks up the active plan for `org_id`.
    async fn resolve(&self, org_id: &str) -> Result<PlanTier, PlanLookupError>;
}

/// Resolver backed by a fixed org-to-plan map.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanResolver {
    plans: HashMap<String, PlanTier>,
}

impl StaticPlanResolver {
    /// Creates an empty resolver; every org resolves to an error.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a plan to an organization.
    pub fn with_plan(mut self, org_id: impl Into<String>, plan: PlanTier) -> Self {
        self.plans.insert(org_id.into(), plan);
        self
    }
}

impl FromIterator<(String, PlanTier)> for StaticPlanResolver {
    fn from_iter<I: IntoIterator<Item = (String, PlanTier)>>(iter: I) -> Self {
        Self {
            plans: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PlanResolver for StaticPlanResolver {
    async fn resolve(&self, org_id: &str) -> Result<PlanTier, PlanLookupError> {
        self.plans
            .get(org_id)
            .copied()
            .ok_or_else(|| PlanLookupError::NoSubscription(org_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parsing() {
        assert_eq!("pro".parse::<PlanTier>().unwrap(), PlanTier::Pro);
        assert_eq!("ENTERPRISE".parse::<PlanTier>().unwrap(), PlanTier::Enterprise);
        assert!("platinum".parse::<PlanTier>().is_err());
    }

    #[test]
    fn test_plan_serializes_lowercase() {
        let json = serde_json::to_string(&PlanTier::Enterprise).unwrap();
        assert_eq!(json, "\"enterprise\"");
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticPlanResolver::new().with_plan("org-1", PlanTier::Pro);

        assert_eq!(resolver.resolve("org-1").await, Ok(PlanTier::Pro));
        assert!(resolver.resolve("org-2").await.is_err());
    }
}
