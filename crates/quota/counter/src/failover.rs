//! Primary store with a local fallback.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreResult;
use crate::local::LocalCounterStore;
use crate::store::{CounterEntry, CounterStore};

/// Routes increments to a primary store and falls back to the local map
/// when the primary fails.
///
/// Fallback counts are per process, so while the primary is down each
/// instance enforces quotas on its own share of the traffic only.
pub struct FailoverCounterStore {
    primary: Arc<dyn CounterStore>,
    fallback: Arc<LocalCounterStore>,
}

impl FailoverCounterStore {
    /// Creates a failover store.
    pub fn new(primary: impl CounterStore + 'static, fallback: Arc<LocalCounterStore>) -> Self {
        Self {
            primary: Arc::new(primary),
            fallback,
        }
    }

    /// Creates a failover store from an already shared primary.
    pub fn with_shared(primary: Arc<dyn CounterStore>, fallback: Arc<LocalCounterStore>) -> Self {
        Self { primary, fallback }
    }

    /// The local fallback store.
    pub fn fallback(&self) -> &Arc<LocalCounterStore> {
        &self.fallback
    }
}

#[async_trait]
impl CounterStore for FailoverCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<CounterEntry> {
        match self.primary.increment(key, window).await {
            Ok(entry) => Ok(entry),
            Err(e) => {
                tracing::warn!(
                    backend = self.primary.backend(),
                    key,
                    error = %e,
                    "Counter store unavailable, using local fallback"
                );
                self.fallback.increment(key, window).await
            }
        }
    }

    fn backend(&self) -> &'static str {
        "failover"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyStore {
        down: AtomicBool,
        inner: LocalCounterStore,
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        async fn increment(&self, key: &str, window: Duration) -> StoreResult<CounterEntry> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            self.inner.increment(key, window).await
        }

        fn backend(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_uses_primary_when_healthy() {
        let fallback = LocalCounterStore::shared();
        let primary = FlakyStore {
            down: AtomicBool::new(false),
            inner: LocalCounterStore::new(),
        };
        let store = FailoverCounterStore::new(primary, fallback.clone());

        store.increment("k", Duration::from_secs(60)).await.unwrap();

        assert!(fallback.is_empty().await);
    }

    #[tokio::test]
    async fn test_falls_back_when_primary_fails() {
        let fallback = LocalCounterStore::shared();
        let primary = FlakyStore {
            down: AtomicBool::new(true),
            inner: LocalCounterStore::new(),
        };
        let store = FailoverCounterStore::new(primary, fallback.clone());

        let first = store.increment("k", Duration::from_secs(60)).await.unwrap();
        let second = store.increment("k", Duration::from_secs(60)).await.unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert_eq!(fallback.len().await, 1);
    }
}
