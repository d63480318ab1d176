//! # Franchise Server
//!
//! Standalone process hosting the resilience layer: quota-guarded
//! request handling, webhook management routes, Prometheus metrics,
//! and the background sweeps that keep counters and deliveries moving.

mod config;

pub use config::{
    CONFIG_PATH_ENV, Config, ConfigError, DEFAULT_REDIS_URL, RedisConfig, ServerConfig, load_config,
};

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use franchise_axum::{QuotaLayer, webhook_routes};
use franchise_counter::{
    CounterStore, FailoverCounterStore, LocalCounterStore, RedisCounterConfig, RedisCounterStore,
    StoreError,
};
use franchise_quota::QuotaGuard;
use franchise_webhooks::{
    HttpTransport, InMemoryWebhookStorage, SubscriptionRegistry, WebhookDispatcher, WebhookError,
    WebhookStorage, WebhookTransport,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Startup failure.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Counter store: {0}")]
    Store(#[from] StoreError),
    #[error("Webhooks: {0}")]
    Webhook(#[from] WebhookError),
    #[error("Failed to install metrics recorder: {0}")]
    Metrics(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Components shared by the routes and the background tasks.
#[derive(Clone)]
pub struct Services {
    /// Admission control for mutating routes.
    pub guard: Arc<QuotaGuard>,
    /// Webhook subscription management.
    pub registry: SubscriptionRegistry,
    /// Webhook delivery.
    pub dispatcher: WebhookDispatcher,
    /// In-process counters used while Redis is unreachable.
    pub fallback: Arc<LocalCounterStore>,
    /// Whether the quota layer reads forwarded client addresses.
    pub trust_forwarded_headers: bool,
}

impl Services {
    /// Builds the services with Redis as the primary counter store.
    pub fn from_config(config: &Config) -> ServerResult<Self> {
        let redis = RedisCounterStore::new(
            RedisCounterConfig::new(config.redis_url())
                .key_prefix(config.redis.key_prefix.clone())
                .timeout(config.redis.timeout())
                .reconnect_backoff(config.redis.reconnect_backoff()),
        )?;
        let transport = HttpTransport::new(config.webhooks.timeout())?;

        Ok(Self::with_components(
            config,
            Arc::new(redis),
            Arc::new(InMemoryWebhookStorage::new()),
            Arc::new(transport),
        ))
    }

    /// Builds the services around explicit components.
    pub fn with_components(
        config: &Config,
        primary: Arc<dyn CounterStore>,
        storage: Arc<dyn WebhookStorage>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        let fallback = LocalCounterStore::shared();
        let store = FailoverCounterStore::with_shared(primary, fallback.clone());
        let guard = QuotaGuard::with_config(
            Arc::new(store),
            Arc::new(config.plan_resolver()),
            config.quota.clone(),
        );

        Self {
            guard: Arc::new(guard),
            registry: SubscriptionRegistry::new(storage.clone()),
            dispatcher: WebhookDispatcher::with_config(storage, transport, config.webhooks.clone()),
            fallback,
            trust_forwarded_headers: config.server.trust_forwarded_headers,
        }
    }

    /// Starts the local counter sweep and the webhook redelivery loop.
    pub fn spawn_background(&self, config: &Config) -> Vec<JoinHandle<()>> {
        let sweeper = self.fallback.clone().spawn_sweeper(config.server.sweep_interval());

        let dispatcher = self.dispatcher.clone();
        let every = config.webhooks.retry_interval();
        let redelivery = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match dispatcher.retry_due(Utc::now()).await {
                    Ok(0) => {}
                    Ok(retried) => tracing::info!(retried, "Redelivered due webhooks"),
                    Err(e) => tracing::error!(error = %e, "Webhook redelivery sweep failed"),
                }
            }
        });

        vec![sweeper, redelivery]
    }
}

/// Installs the global Prometheus recorder.
pub fn install_metrics() -> ServerResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))
}

/// Builds the HTTP application.
///
/// Every mutating request passes the quota layer. `/metrics` is only
/// mounted when a recorder handle is given.
pub fn router(services: &Services, metrics: Option<PrometheusHandle>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .merge(webhook_routes(
            services.registry.clone(),
            services.dispatcher.clone(),
        ));

    if let Some(handle) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(render_metrics))
                .with_state(handle),
        );
    }

    app.layer(
        QuotaLayer::new(services.guard.clone())
            .trust_forwarded_headers(services.trust_forwarded_headers),
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
        .into_response()
}

/// Runs the server until Ctrl-C.
pub async fn run(config: Config) -> ServerResult<()> {
    let metrics = install_metrics()?;
    let services = Services::from_config(&config)?;
    let background = services.spawn_background(&config);
    let app = router(&services, Some(metrics));

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        address = %address,
        environment = %config.server.environment,
        plans = config.plans.len(),
        "Franchise server listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for task in background {
        task.abort();
    }
    tracing::info!("Franchise server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
