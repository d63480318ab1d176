//! In-process counter store.
//!
//! Only correct inside a single process: two instances behind a load
//! balancer each keep their own map. It exists so that quota enforcement
//! degrades instead of disappearing while Redis is down.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::StoreResult;
use crate::store::{CounterEntry, CounterStore};

/// Counter map owned by one process.
#[derive(Debug, Default)]
pub struct LocalCounterStore {
    entries: RwLock<HashMap<String, CounterEntry>>,
}

impl LocalCounterStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared store, ready to hand to a sweeper.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Increments `key` as of `now`.
    pub async fn increment_at(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> CounterEntry {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(365));
        let mut entries = self.entries.write().await;

        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if now >= entry.reset_at {
                    entry.count = 1;
                    entry.reset_at = now + window;
                } else {
                    entry.count = entry.count.saturating_add(1);
                }
            })
            .or_insert_with(|| CounterEntry {
                count: 1,
                reset_at: now + window,
            });

        *entry
    }

    /// Removes entries whose window ended before `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.reset_at > now);
        before - entries.len()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true when no entry is tracked.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Spawns the periodic sweep. Dropping the store does not stop it;
    /// abort the returned handle on shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = self.sweep_at(Utc::now()).await;
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired local counters");
                }
            }
        })
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<CounterEntry> {
        Ok(self.increment_at(key, window, Utc::now()).await)
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
