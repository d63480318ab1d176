//! Counter store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::StoreResult;

/// State of a counter after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Number of increments seen in the current window.
    pub count: u64,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
}

impl CounterEntry {
    /// Seconds until the window resets, never negative.
    pub fn seconds_until_reset(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_seconds().max(0) as u64
    }
}

/// Trait for fixed-window counter backends.
///
/// `increment` must be atomic with respect to concurrent callers on the
/// same key. The window is anchored at the first increment: later
/// increments never push `reset_at` further out.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments the counter for `key`, starting a new window of length
    /// `window` when none is active.
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<CounterEntry>;

    /// Short backend name used in logs.
    fn backend(&self) -> &'static str;
}
