//! Server configuration.
//!
//! Loaded from an optional TOML file, then overridden from the
//! environment:
//!
//! ```toml
//! [server]
//! port = 8000
//! environment = "production"
//!
//! [redis]
//! url = "redis://cache:6379/0"
//!
//! [quota]
//! free = 10
//!
//! [webhooks]
//! max_attempts = 5
//!
//! [plans]
//! org-acme = "enterprise"
//! ```

use franchise_quota::{PlanTier, QuotaConfig, StaticPlanResolver};
use franchise_webhooks::WebhookConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Variable naming the TOML file to load.
pub const CONFIG_PATH_ENV: &str = "FRANCHISE_CONFIG";
/// Redis URL used outside production when none is configured.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and runtime settings.
    pub server: ServerConfig,
    /// Counter store connection.
    pub redis: RedisConfig,
    /// Request quotas.
    pub quota: QuotaConfig,
    /// Webhook delivery.
    pub webhooks: WebhookConfig,
    /// Plan of each organization. Unlisted organizations are `free`.
    pub plans: HashMap<String, PlanTier>,
}

/// Server-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Deployment environment, `production` enables strict checks.
    pub environment: String,
    /// Default log filter.
    pub log_level: String,
    /// Interval of the local counter sweep in seconds.
    pub sweep_interval_secs: u64,
    /// Take client addresses from `X-Forwarded-For` / `X-Real-IP`.
    /// Enable only behind a reverse proxy that sets them.
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "0.0.0.0".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            sweep_interval_secs: 30,
            trust_forwarded_headers: false,
        }
    }
}

impl ServerConfig {
    /// Whether strict production checks apply.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Address to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Local counter sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Redis configuration for the counter store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL. Required in production.
    pub url: Option<String>,
    /// Prefix of every counter key.
    pub key_prefix: String,
    /// Upper bound for one round trip in milliseconds.
    pub timeout_ms: u64,
    /// Fail-fast window after a failed connect, in milliseconds.
    pub reconnect_backoff_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "ratelimit:".to_string(),
            timeout_ms: 250,
            reconnect_backoff_ms: 5000,
        }
    }
}

impl RedisConfig {
    /// Round trip timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Fail-fast window after a failed connect.
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

impl Config {
    /// Parses a TOML document. Missing tables take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads the file named by `FRANCHISE_CONFIG` (if set) and applies
    /// the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_config_path()?.with_env(|key| std::env::var(key).ok())
    }

    /// Loads the file named by `FRANCHISE_CONFIG`, or the defaults when
    /// the variable is unset. Environment overrides are not applied.
    pub fn from_config_path() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => load_config(&path),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Applies `APP_ENV`, `REDIS_URL`, `PORT` and `LOG_LEVEL` from `lookup`,
    /// then resolves the Redis URL.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(environment) = lookup("APP_ENV") {
            self.server.environment = environment;
        }
        if let Some(url) = lookup("REDIS_URL").filter(|url| !url.trim().is_empty()) {
            self.redis.url = Some(url);
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.server.log_level = level;
        }

        self.resolve_redis_url()?;
        Ok(self)
    }

    fn resolve_redis_url(&mut self) -> Result<(), ConfigError> {
        if self.redis.url.is_some() {
            return Ok(());
        }
        if self.server.is_production() {
            return Err(ConfigError::MissingRedisUrl);
        }

        tracing::info!(url = DEFAULT_REDIS_URL, "No Redis URL configured, using local default");
        self.redis.url = Some(DEFAULT_REDIS_URL.to_string());
        Ok(())
    }

    /// Redis URL after resolution.
    pub fn redis_url(&self) -> &str {
        self.redis.url.as_deref().unwrap_or(DEFAULT_REDIS_URL)
    }

    /// Plan resolver built from the `[plans]` table.
    pub fn plan_resolver(&self) -> StaticPlanResolver {
        self.plans
            .iter()
            .map(|(org, plan)| (org.clone(), *plan))
            .collect()
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    Config::from_toml(&content)
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {message}")]
    Io { path: String, message: String },
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("REDIS_URL is required in production")]
    MissingRedisUrl,
}
