//! Admission decisions for mutating requests.

use franchise_counter::{CounterStore, StoreError};
use serde::Serialize;
use std::sync::Arc;

use crate::config::QuotaConfig;
use crate::error::{QuotaError, QuotaResult};
use crate::plan::{PlanResolver, PlanTier};

/// Authenticated caller as seen by the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// User or API client id.
    pub id: String,
    /// Organization the caller acts for, if any.
    pub org_id: Option<String>,
}

impl Subject {
    /// Creates a subject without an organization.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            org_id: None,
        }
    }

    /// Sets the organization.
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }
}

/// Which quota a denial refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    /// The plan quota of the subject.
    Subject,
    /// The global ceiling of the source address.
    SourceAddress,
}

/// Details of an allowed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Resolved plan.
    pub plan: PlanTier,
    /// Subject quota for the plan.
    pub limit: u64,
    /// Requests left for the subject in this window, unknown when degraded.
    pub remaining: Option<u64>,
    /// True when the counters could not be consulted.
    pub degraded: bool,
}

/// Details of a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Denial {
    /// Quota that was exceeded.
    pub kind: LimitKind,
    /// Resolved plan.
    pub plan: PlanTier,
    /// Value of the exceeded limit.
    pub limit: u64,
    /// Window length in seconds.
    pub window: u64,
    /// Seconds the caller should wait.
    pub retry_after: u64,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through.
    Allow(Admission),
    /// Reject with 429.
    Deny(Denial),
}

impl Decision {
    /// Returns true if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Enforces per-subject and per-address quotas.
pub struct QuotaGuard {
    store: Arc<dyn CounterStore>,
    plans: Arc<dyn PlanResolver>,
    config: QuotaConfig,
}

impl QuotaGuard {
    /// Creates a guard with the default limits.
    pub fn new(store: Arc<dyn CounterStore>, plans: Arc<dyn PlanResolver>) -> Self {
        Self::with_config(store, plans, QuotaConfig::default())
    }

    /// Creates a guard with custom limits.
    pub fn with_config(
        store: Arc<dyn CounterStore>,
        plans: Arc<dyn PlanResolver>,
        config: QuotaConfig,
    ) -> Self {
        Self {
            store,
            plans,
            config,
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Decides whether `subject` may call `route` from `source_address`.
    ///
    /// Fails with `AuthRequired` when no subject is given. Every other
    /// internal failure allows the request.
    pub async fn admit(
        &self,
        subject: Option<&Subject>,
        source_address: &str,
        route: &str,
    ) -> QuotaResult<Decision> {
        let subject = subject
            .filter(|s| !s.id.is_empty())
            .ok_or(QuotaError::AuthRequired)?;

        let plan = self.resolve_plan(subject.org_id.as_deref()).await;
        let limit = self.config.limit_for(plan);

        let (subject_count, address_count) =
            match self.count(&subject.id, source_address, route).await {
                Ok(counts) => counts,
                Err(e) => {
                    tracing::warn!(
                        subject_id = %subject.id,
                        route,
                        error = %e,
                        "Quota counters unavailable, allowing request"
                    );
                    return Ok(Decision::Allow(Admission {
                        plan,
                        limit,
                        remaining: None,
                        degraded: true,
                    }));
                }
            };

        let exceeded = if subject_count > limit {
            Some((LimitKind::Subject, limit))
        } else if address_count > self.config.address_ceiling {
            Some((LimitKind::SourceAddress, self.config.address_ceiling))
        } else {
            None
        };

        if let Some((kind, limit)) = exceeded {
            tracing::debug!(
                subject_id = %subject.id,
                source_address,
                route,
                plan = plan.as_str(),
                ?kind,
                limit,
                "Quota exceeded"
            );
            metrics::counter!(
                "quota_denials_total",
                "route" => route.to_string(),
                "plan" => plan.as_str()
            )
            .increment(1);

            return Ok(Decision::Deny(Denial {
                kind,
                plan,
                limit,
                window: self.config.window_secs,
                retry_after: self.config.window_secs,
            }));
        }

        Ok(Decision::Allow(Admission {
            plan,
            limit,
            remaining: Some(limit - subject_count),
            degraded: false,
        }))
    }

    async fn resolve_plan(&self, org_id: Option<&str>) -> PlanTier {
        let Some(org_id) = org_id else {
            return PlanTier::Free;
        };

        match tokio::time::timeout(self.config.plan_lookup_timeout(), self.plans.resolve(org_id))
            .await
        {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => {
                tracing::debug!(org_id, error = %e, "Plan lookup failed, using free tier");
                PlanTier::Free
            }
            Err(_) => {
                tracing::warn!(org_id, "Plan lookup timed out, using free tier");
                PlanTier::Free
            }
        }
    }

    async fn count(
        &self,
        subject_id: &str,
        source_address: &str,
        route: &str,
    ) -> Result<(u64, u64), StoreError> {
        let window = self.config.window();
        let subject_key = format!("user:{subject_id}:{route}");
        let address_key = format!("ip:{source_address}:{route}");

        let (subject, address) = tokio::try_join!(
            self.store.increment(&subject_key, window),
            self.store.increment(&address_key, window),
        )?;

        Ok((subject.count, address.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanLookupError, StaticPlanResolver};
    use async_trait::async_trait;
    use franchise_counter::{CounterEntry, LocalCounterStore, StoreResult};
    use std::time::Duration;

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment(&self, _key: &str, _window: Duration) -> StoreResult<CounterEntry> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn backend(&self) -> &'static str {
            "down"
        }
    }

    struct BrokenResolver;

    #[async_trait]
    impl PlanResolver for BrokenResolver {
        async fn resolve(&self, _org_id: &str) -> Result<PlanTier, PlanLookupError> {
            Err(PlanLookupError::Backend("database offline".into()))
        }
    }

    fn guard_with(plans: impl PlanResolver + 'static) -> QuotaGuard {
        QuotaGuard::new(Arc::new(LocalCounterStore::new()), Arc::new(plans))
    }

    #[tokio::test]
    async fn test_free_plan_allows_ten_then_denies() {
        let guard = guard_with(StaticPlanResolver::new().with_plan("org-1", PlanTier::Free));
        let subject = Subject::new("user-1").with_org("org-1");

        for _ in 0..10 {
            let decision = guard.admit(Some(&subject), "10.0.0.1", "/orders").await.unwrap();
            assert!(decision.is_allowed());
        }

        let decision = guard.admit(Some(&subject), "10.0.0.1", "/orders").await.unwrap();
        match decision {
            Decision::Deny(denial) => {
                assert_eq!(denial.kind, LimitKind::Subject);
                assert_eq!(denial.limit, 10);
                assert_eq!(denial.plan, PlanTier::Free);
                assert_eq!(denial.retry_after, 60);
            }
            Decision::Allow(_) => panic!("11th request should be denied"),
        }
    }

    #[tokio::test]
    async fn test_pro_plan_has_higher_quota() {
        let guard = guard_with(StaticPlanResolver::new().with_plan("org-1", PlanTier::Pro));
        let subject = Subject::new("user-1").with_org("org-1");

        for _ in 0..60 {
            assert!(guard.admit(Some(&subject), "10.0.0.1", "/orders").await.unwrap().is_allowed());
        }
        assert!(!guard.admit(Some(&subject), "10.0.0.1", "/orders").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_failed_plan_lookup_is_treated_as_free() {
        let guard = guard_with(BrokenResolver);
        let subject = Subject::new("user-1").with_org("org-1");

        let first = guard.admit(Some(&subject), "10.0.0.1", "/orders").await.unwrap();
        match first {
            Decision::Allow(admission) => {
                assert_eq!(admission.plan, PlanTier::Free);
                assert_eq!(admission.limit, 10);
                assert_eq!(admission.remaining, Some(9));
            }
            Decision::Deny(_) => panic!("first request should be allowed"),
        }
    }

    #[tokio::test]
    async fn test_missing_subject_is_rejected() {
        let guard = guard_with(StaticPlanResolver::new());

        let result = guard.admit(None, "10.0.0.1", "/orders").await;
        assert_eq!(result, Err(QuotaError::AuthRequired));

        let anonymous = Subject::new("");
        let result = guard.admit(Some(&anonymous), "10.0.0.1", "/orders").await;
        assert_eq!(result, Err(QuotaError::AuthRequired));
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let guard = QuotaGuard::new(Arc::new(DownStore), Arc::new(StaticPlanResolver::new()));
        let subject = Subject::new("user-1");

        for _ in 0..50 {
            match guard.admit(Some(&subject), "10.0.0.1", "/orders").await.unwrap() {
                Decision::Allow(admission) => assert!(admission.degraded),
                Decision::Deny(_) => panic!("store failure must not deny"),
            }
        }
    }

    #[tokio::test]
    async fn test_address_ceiling_applies_across_subjects() {
        let config = QuotaConfig::default().address_ceiling(3);
        let guard = QuotaGuard::with_config(
            Arc::new(LocalCounterStore::new()),
            Arc::new(StaticPlanResolver::new()),
            config,
        );

        for i in 0..3 {
            let subject = Subject::new(format!("user-{i}"));
            assert!(guard.admit(Some(&subject), "10.0.0.9", "/orders").await.unwrap().is_allowed());
        }

        let subject = Subject::new("user-99");
        match guard.admit(Some(&subject), "10.0.0.9", "/orders").await.unwrap() {
            Decision::Deny(denial) => {
                assert_eq!(denial.kind, LimitKind::SourceAddress);
                assert_eq!(denial.limit, 3);
            }
            Decision::Allow(_) => panic!("address ceiling should deny"),
        }
    }

    #[tokio::test]
    async fn test_subject_limit_reported_first() {
        let config = QuotaConfig::default().address_ceiling(5);
        let guard = QuotaGuard::with_config(
            Arc::new(LocalCounterStore::new()),
            Arc::new(StaticPlanResolver::new()),
            config,
        );
        let subject = Subject::new("user-1");

        let mut last = None;
        for _ in 0..11 {
            last = Some(guard.admit(Some(&subject), "10.0.0.1", "/orders").await.unwrap());
        }

        match last.unwrap() {
            Decision::Deny(denial) => assert_eq!(denial.kind, LimitKind::Subject),
            Decision::Allow(_) => panic!("both limits exceeded"),
        }
    }

    #[tokio::test]
    async fn test_routes_are_counted_separately() {
        let guard = guard_with(StaticPlanResolver::new());
        let subject = Subject::new("user-1");

        for _ in 0..10 {
            guard.admit(Some(&subject), "10.0.0.1", "/orders").await.unwrap();
        }

        let other = guard.admit(Some(&subject), "10.0.0.1", "/invoices").await.unwrap();
        assert!(other.is_allowed());
    }
}
