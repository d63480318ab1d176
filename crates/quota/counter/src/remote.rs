//! Redis counter store.
//!
//! The increment runs as one server-side script: `INCR`, set the expiry
//! when the window is new, and read back the remaining TTL. Redis runs
//! scripts atomically, so concurrent handlers never undercount.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::store::{CounterEntry, CounterStore};

const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Redis connection settings for the counter store.
#[derive(Debug, Clone)]
pub struct RedisCounterConfig {
    /// Connection URL, e.g. `redis://cache:6379/0`.
    pub url: String,
    /// Prefix applied to every key.
    pub key_prefix: String,
    /// Upper bound for a single round trip, connection included.
    pub timeout: Duration,
    /// After a failed connect, calls fail fast for this long before the
    /// next connect attempt.
    pub reconnect_backoff: Duration,
}

impl RedisCounterConfig {
    /// Creates a config for the given URL with default prefix and timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: "ratelimit:".to_string(),
            timeout: Duration::from_millis(250),
            reconnect_backoff: Duration::from_secs(5),
        }
    }

    /// Sets the key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Sets the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how long to fail fast after a failed connect.
    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

/// Counter store backed by Redis.
///
/// The connection manager is created on first use, so an outage at
/// startup only costs the failed calls and the process still boots.
/// While a connect failure is fresher than `reconnect_backoff`, calls
/// return `Unavailable` without touching the network.
pub struct RedisCounterStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    connect_failed_at: RwLock<Option<Instant>>,
    script: Script,
    config: RedisCounterConfig,
}

impl RedisCounterStore {
    /// Creates a store. Only the URL is validated here; no connection is made.
    pub fn new(config: RedisCounterConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            connect_failed_at: RwLock::new(None),
            script: Script::new(INCREMENT_SCRIPT),
            config,
        })
    }

    /// Creates a store with default settings for `url`.
    pub fn open(url: impl Into<String>) -> StoreResult<Self> {
        Self::new(RedisCounterConfig::new(url))
    }

    async fn backing_off(&self) -> bool {
        self.connect_failed_at
            .read()
            .await
            .is_some_and(|at| at.elapsed() < self.config.reconnect_backoff)
    }

    async fn note_connect_failure(&self, error: &StoreError) {
        let mut failed_at = self.connect_failed_at.write().await;
        if failed_at.is_some_and(|at| at.elapsed() < self.config.reconnect_backoff) {
            return;
        }
        *failed_at = Some(Instant::now());
        tracing::warn!(
            url = %self.config.url,
            error = %error,
            backoff_ms = self.config.reconnect_backoff.as_millis() as u64,
            "Redis connect failed, backing off"
        );
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        if let Some(manager) = self.connection.get() {
            return Ok(manager.clone());
        }
        if self.backing_off().await {
            return Err(StoreError::Unavailable("redis reconnect backoff".to_string()));
        }

        let manager = self
            .connection
            .get_or_try_init(|| async {
                ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(StoreError::from)
            })
            .await?;
        Ok(manager.clone())
    }

    async fn run_script(&self, key: &str, window_ms: u64) -> StoreResult<(u64, i64)> {
        let mut connection = self.connection().await?;
        let reply: (u64, i64) = self
            .script
            .key(format!("{}{}", self.config.key_prefix, key))
            .arg(window_ms)
            .invoke_async(&mut connection)
            .await?;
        Ok(reply)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<CounterEntry> {
        let window_ms = window.as_millis() as u64;
        let timeout_ms = self.config.timeout.as_millis() as u64;

        let reply = tokio::time::timeout(self.config.timeout, self.run_script(key, window_ms))
            .await
            .map_err(|_| StoreError::Timeout(timeout_ms))
            .and_then(|reply| reply);

        let (count, ttl_ms) = match reply {
            Ok(reply) => reply,
            Err(e) => {
                if self.connection.get().is_none() {
                    self.note_connect_failure(&e).await;
                }
                return Err(e);
            }
        };

        if ttl_ms < 0 {
            return Err(StoreError::InvalidReply(format!("negative ttl {ttl_ms} for {key}")));
        }

        Ok(CounterEntry {
            count,
            reset_at: Utc::now() + chrono::Duration::milliseconds(ttl_ms),
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
