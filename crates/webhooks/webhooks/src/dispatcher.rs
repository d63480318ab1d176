//! Event fan-out, signed delivery, manual and automatic retry.

use chrono::{DateTime, Utc};
use franchise_backoff::delay_for;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::config::WebhookConfig;
use crate::delivery::{
    DeliveryFilter, DeliveryStatus, SubscriptionMetrics, WebhookDelivery,
};
use crate::error::{WebhookError, WebhookResult};
use crate::registry::load_owned;
use crate::signature::{
    EVENT_HEADER, ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, signature_header,
};
use crate::storage::WebhookStorage;
use crate::subscription::WebhookSubscription;
use crate::transport::{OutboundRequest, WebhookTransport};

/// Sends events to subscribers and tracks the outcome.
#[derive(Clone)]
pub struct WebhookDispatcher {
    storage: Arc<dyn WebhookStorage>,
    transport: Arc<dyn WebhookTransport>,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    /// Creates a dispatcher with the default configuration.
    pub fn new(storage: Arc<dyn WebhookStorage>, transport: Arc<dyn WebhookTransport>) -> Self {
        Self::with_config(storage, transport, WebhookConfig::default())
    }

    /// Creates a dispatcher with a custom configuration.
    pub fn with_config(
        storage: Arc<dyn WebhookStorage>,
        transport: Arc<dyn WebhookTransport>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            storage,
            transport,
            config,
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Creates one pending delivery per matching active subscription and
    /// pushes each on a background task.
    ///
    /// Returns the deliveries as created, before any attempt.
    pub async fn enqueue_event(
        &self,
        event_type: &str,
        org_id: &str,
        payload: Value,
    ) -> WebhookResult<Vec<WebhookDelivery>> {
        let subscribers = self.storage.find_subscribers(org_id, event_type).await?;
        let mut created = Vec::with_capacity(subscribers.len());

        for subscription in subscribers {
            let delivery = WebhookDelivery::new(&subscription, event_type, payload.clone());
            self.storage.save_delivery(&delivery).await?;
            created.push(delivery.clone());

            let dispatcher = self.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.attempt(&subscription, delivery).await {
                    tracing::error!(
                        target: "webhook_delivery",
                        subscription_id = %subscription.id,
                        error = %e,
                        "Failed to record delivery attempt"
                    );
                }
            });
        }

        tracing::debug!(
            org_id = %org_id,
            event_type = %event_type,
            deliveries = created.len(),
            "Event enqueued"
        );
        Ok(created)
    }

    /// Re-pushes a failed or pending delivery with the subscription's
    /// current secret and a fresh timestamp.
    pub async fn retry_delivery(&self, id: &str, org_id: &str) -> WebhookResult<WebhookDelivery> {
        let delivery = self
            .storage
            .get_delivery(id)
            .await?
            .ok_or_else(|| WebhookError::DeliveryNotFound(id.to_string()))?;

        if delivery.org_id != org_id {
            return Err(WebhookError::Unauthorized);
        }
        if delivery.status == DeliveryStatus::Success {
            return Err(WebhookError::RetrySuccessfulDelivery);
        }
        if delivery.attempts >= self.config.max_attempts {
            return Err(WebhookError::MaxAttemptsExceeded);
        }

        let subscription = self
            .storage
            .get_subscription(&delivery.subscription_id)
            .await?
            .ok_or_else(|| WebhookError::SubscriptionNotFound(delivery.subscription_id.clone()))?;

        self.attempt(&subscription, delivery).await
    }

    /// Delivery statistics of a subscription.
    pub async fn get_subscription_metrics(
        &self,
        id: &str,
        org_id: &str,
    ) -> WebhookResult<SubscriptionMetrics> {
        let subscription = load_owned(self.storage.as_ref(), id, org_id).await?;
        let deliveries = self.storage.deliveries_for_subscription(&subscription.id).await?;
        Ok(SubscriptionMetrics::from_deliveries(&subscription.id, &deliveries))
    }

    /// Lists deliveries, newest first.
    pub async fn list_deliveries(
        &self,
        filter: &DeliveryFilter,
    ) -> WebhookResult<Vec<WebhookDelivery>> {
        self.storage.list_deliveries(filter).await
    }

    /// Re-pushes failed deliveries whose backoff delay has elapsed, and
    /// pending deliveries whose first push was lost.
    ///
    /// A pending delivery counts as lost once it is older than the push
    /// timeout. Deliveries of disabled subscriptions are left alone. A
    /// failing attempt is logged and the sweep moves on. Returns the
    /// number of attempts made.
    pub async fn retry_due(&self, now: DateTime<Utc>) -> WebhookResult<usize> {
        let timeout = chrono::Duration::from_std(self.config.timeout())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let candidates = self
            .storage
            .list_retryable(self.config.max_attempts, now - timeout)
            .await?;
        let mut retried = 0;

        for delivery in candidates {
            if !is_due(&delivery, now) {
                continue;
            }

            let Some(subscription) = self.storage.get_subscription(&delivery.subscription_id).await?
            else {
                continue;
            };
            if !subscription.is_active() {
                continue;
            }

            let delivery_id = delivery.id.clone();
            match self.attempt(&subscription, delivery).await {
                Ok(_) => retried += 1,
                Err(e) => tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery_id,
                    subscription_id = %subscription.id,
                    error = %e,
                    "Webhook redelivery failed"
                ),
            }
        }

        if retried > 0 {
            tracing::info!(retried, "Redelivered failed webhooks");
        }
        Ok(retried)
    }

    /// Signs and sends one attempt, then stores the outcome.
    async fn attempt(
        &self,
        subscription: &WebhookSubscription,
        mut delivery: WebhookDelivery,
    ) -> WebhookResult<WebhookDelivery> {
        let body = serde_json::to_string(&delivery.envelope())?;
        let timestamp = Utc::now().timestamp();
        let request = OutboundRequest {
            url: subscription.url.clone(),
            headers: vec![
                (
                    SIGNATURE_HEADER.to_string(),
                    signature_header(&subscription.secret, timestamp, body.as_bytes()),
                ),
                (TIMESTAMP_HEADER.to_string(), timestamp.to_string()),
                (ID_HEADER.to_string(), delivery.id.clone()),
                (EVENT_HEADER.to_string(), delivery.event_type.clone()),
            ],
            body,
        };

        let start = Instant::now();
        let result = tokio::time::timeout(self.config.timeout(), self.transport.send(&request))
            .await
            .unwrap_or(Err(WebhookError::Timeout));
        let latency_ms = start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(status) if (200..300).contains(&status) => {
                delivery.mark_success(status, latency_ms);
                tracing::info!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    subscription_id = %subscription.id,
                    status,
                    latency_ms,
                    "Webhook delivered"
                );
                "success"
            }
            Ok(status) => {
                delivery.mark_failed(Some(status), format!("HTTP {status}"));
                "failed"
            }
            Err(e) => {
                delivery.mark_failed(None, e.to_string());
                "failed"
            }
        };

        if delivery.status == DeliveryStatus::Failed {
            let error = delivery.last_error.as_deref().unwrap_or_default();
            if delivery.attempts >= self.config.max_attempts {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    subscription_id = %subscription.id,
                    attempts = delivery.attempts,
                    error = %error,
                    "Webhook delivery failed permanently"
                );
            } else {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    subscription_id = %subscription.id,
                    attempts = delivery.attempts,
                    error = %error,
                    "Webhook delivery failed"
                );
            }
        }

        metrics::counter!("webhook_deliveries_total", "outcome" => outcome).increment(1);
        self.storage.save_delivery(&delivery).await?;
        Ok(delivery)
    }
}

fn is_due(delivery: &WebhookDelivery, now: DateTime<Utc>) -> bool {
    let Some(last) = delivery.last_attempt_at else {
        return true;
    };
    match chrono::Duration::from_std(delay_for(delivery.attempts)) {
        Ok(delay) => last + delay <= now,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubscriptionRegistry;
    use crate::storage::InMemoryWebhookStorage;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Replies with queued statuses (200 when empty) and keeps every request.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<WebhookResult<u16>>>,
        sent: Mutex<Vec<OutboundRequest>>,
    }

    impl ScriptedTransport {
        async fn reply(&self, reply: WebhookResult<u16>) {
            self.replies.lock().await.push_back(reply);
        }
    }

    #[async_trait]
    impl WebhookTransport for ScriptedTransport {
        async fn send(&self, request: &OutboundRequest) -> WebhookResult<u16> {
            self.sent.lock().await.push(request.clone());
            self.replies.lock().await.pop_front().unwrap_or(Ok(200))
        }
    }

    struct Fixture {
        storage: Arc<InMemoryWebhookStorage>,
        transport: Arc<ScriptedTransport>,
        registry: SubscriptionRegistry,
        dispatcher: WebhookDispatcher,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryWebhookStorage::new());
        let transport = Arc::new(ScriptedTransport::default());
        Fixture {
            registry: SubscriptionRegistry::new(storage.clone()),
            dispatcher: WebhookDispatcher::new(storage.clone(), transport.clone()),
            storage,
            transport,
        }
    }

    async fn subscribe(f: &Fixture, org: &str) -> WebhookSubscription {
        let created = f
            .registry
            .create(org, "https://example.com/hook", vec!["order.created".into()], "user-1")
            .await
            .unwrap();
        let mut subscription = created.subscription;
        subscription.secret = created.secret;
        subscription
    }

    async fn settled(f: &Fixture, id: &str) -> WebhookDelivery {
        for _ in 0..100 {
            let delivery = f.storage.get_delivery(id).await.unwrap().unwrap();
            if delivery.status != DeliveryStatus::Pending {
                return delivery;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("delivery {id} never attempted");
    }

    async fn failed_delivery(f: &Fixture, subscription: &WebhookSubscription, attempts: u32) -> WebhookDelivery {
        let mut delivery = WebhookDelivery::new(subscription, "order.created", Value::Null);
        for _ in 0..attempts {
            delivery.mark_failed(Some(500), "HTTP 500");
        }
        f.storage.save_delivery(&delivery).await.unwrap();
        delivery
    }

    #[tokio::test]
    async fn test_enqueue_only_matching_active_subscriptions() {
        let f = fixture();
        let active = subscribe(&f, "org-1").await;
        let disabled = subscribe(&f, "org-1").await;
        f.registry.disable(&disabled.id, "org-1").await.unwrap();
        subscribe(&f, "org-2").await;

        let created = f
            .dispatcher
            .enqueue_event("order.created", "org-1", serde_json::json!({"orderId": "o-1"}))
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].subscription_id, active.id);
        assert_eq!(created[0].status, DeliveryStatus::Pending);

        let none = f
            .dispatcher
            .enqueue_event("order.cancelled", "org-1", Value::Null)
            .await
            .unwrap();
        assert!(none.is_empty());

        let delivered = settled(&f, &created[0].id).await;
        assert_eq!(delivered.status, DeliveryStatus::Success);
        assert_eq!(delivered.attempts, 1);
        assert!(delivered.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_push_is_signed() {
        let f = fixture();
        let subscription = subscribe(&f, "org-1").await;

        let created = f
            .dispatcher
            .enqueue_event("order.created", "org-1", serde_json::json!({"orderId": "o-1"}))
            .await
            .unwrap();
        settled(&f, &created[0].id).await;

        let sent = f.transport.sent.lock().await;
        let request = &sent[0];
        let timestamp: i64 = request.header(TIMESTAMP_HEADER).unwrap().parse().unwrap();
        let expected = signature_header(&subscription.secret, timestamp, request.body.as_bytes());

        assert_eq!(request.header(SIGNATURE_HEADER), Some(expected.as_str()));
        assert_eq!(request.header(ID_HEADER), Some(created[0].id.as_str()));
        assert_eq!(request.header(EVENT_HEADER), Some("order.created"));

        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["type"], "order.created");
        assert_eq!(body["orgId"], "org-1");
        assert_eq!(body["data"]["orderId"], "o-1");
    }

    #[tokio::test]
    async fn test_failed_push_is_recorded() {
        let f = fixture();
        subscribe(&f, "org-1").await;
        f.transport.reply(Ok(503)).await;

        let created = f
            .dispatcher
            .enqueue_event("order.created", "org-1", Value::Null)
            .await
            .unwrap();

        let delivery = settled(&f, &created[0].id).await;
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.attempts, 1);
        assert_eq!(delivery.response_status, Some(503));
        assert_eq!(delivery.last_error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn test_retry_rules() {
        let f = fixture();
        let subscription = subscribe(&f, "org-1").await;

        let mut success = WebhookDelivery::new(&subscription, "order.created", Value::Null);
        success.mark_success(200, 10);
        f.storage.save_delivery(&success).await.unwrap();
        assert!(matches!(
            f.dispatcher.retry_delivery(&success.id, "org-1").await,
            Err(WebhookError::RetrySuccessfulDelivery)
        ));

        let exhausted = failed_delivery(&f, &subscription, 5).await;
        assert!(matches!(
            f.dispatcher.retry_delivery(&exhausted.id, "org-1").await,
            Err(WebhookError::MaxAttemptsExceeded)
        ));

        let retryable = failed_delivery(&f, &subscription, 2).await;
        assert!(matches!(
            f.dispatcher.retry_delivery(&retryable.id, "org-2").await,
            Err(WebhookError::Unauthorized)
        ));

        let retried = f.dispatcher.retry_delivery(&retryable.id, "org-1").await.unwrap();
        assert_eq!(retried.id, retryable.id);
        assert_eq!(retried.status, DeliveryStatus::Success);
        assert_eq!(retried.attempts, 3);

        assert!(matches!(
            f.dispatcher.retry_delivery("missing", "org-1").await,
            Err(WebhookError::DeliveryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_uses_current_secret() {
        let f = fixture();
        let subscription = subscribe(&f, "org-1").await;
        let delivery = failed_delivery(&f, &subscription, 1).await;

        let rotated = f
            .registry
            .regenerate_secret(&subscription.id, "org-1")
            .await
            .unwrap();
        f.dispatcher.retry_delivery(&delivery.id, "org-1").await.unwrap();

        let sent = f.transport.sent.lock().await;
        let request = sent.last().unwrap();
        let timestamp: i64 = request.header(TIMESTAMP_HEADER).unwrap().parse().unwrap();
        let expected = signature_header(&rotated.secret, timestamp, request.body.as_bytes());
        assert_eq!(request.header(SIGNATURE_HEADER), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_retry_due_respects_backoff_and_status() {
        let f = fixture();
        let subscription = subscribe(&f, "org-1").await;
        let delivery = failed_delivery(&f, &subscription, 1).await;
        let last = delivery.last_attempt_at.unwrap();

        assert_eq!(f.dispatcher.retry_due(last + chrono::Duration::minutes(1)).await.unwrap(), 0);
        assert_eq!(f.dispatcher.retry_due(last + chrono::Duration::minutes(6)).await.unwrap(), 1);

        let stored = f.storage.get_delivery(&delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Success);
        assert_eq!(stored.attempts, 2);

        let other = failed_delivery(&f, &subscription, 1).await;
        f.registry.disable(&subscription.id, "org-1").await.unwrap();
        let later = other.last_attempt_at.unwrap() + chrono::Duration::hours(1);
        assert_eq!(f.dispatcher.retry_due(later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_due_picks_up_lost_pending_delivery() {
        let f = fixture();
        let subscription = subscribe(&f, "org-1").await;
        let delivery = WebhookDelivery::new(&subscription, "order.created", Value::Null);
        f.storage.save_delivery(&delivery).await.unwrap();

        // still within the push timeout: the spawned push may be running
        assert_eq!(f.dispatcher.retry_due(delivery.created_at).await.unwrap(), 0);

        let later = delivery.created_at + chrono::Duration::days(1);
        assert_eq!(f.dispatcher.retry_due(later).await.unwrap(), 1);

        let stored = f.storage.get_delivery(&delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Success);
        assert_eq!(stored.attempts, 1);
        assert_eq!(f.transport.sent.lock().await.len(), 1);
    }

    /// Fails every save of one delivery, delegating the rest.
    struct PoisonedStorage {
        inner: InMemoryWebhookStorage,
        poisoned: Mutex<Option<String>>,
    }

    #[async_trait]
    impl WebhookStorage for PoisonedStorage {
        async fn save_subscription(&self, subscription: &WebhookSubscription) -> WebhookResult<()> {
            self.inner.save_subscription(subscription).await
        }

        async fn get_subscription(&self, id: &str) -> WebhookResult<Option<WebhookSubscription>> {
            self.inner.get_subscription(id).await
        }

        async fn list_subscriptions(&self, org_id: &str) -> WebhookResult<Vec<WebhookSubscription>> {
            self.inner.list_subscriptions(org_id).await
        }

        async fn find_subscribers(
            &self,
            org_id: &str,
            event_type: &str,
        ) -> WebhookResult<Vec<WebhookSubscription>> {
            self.inner.find_subscribers(org_id, event_type).await
        }

        async fn save_delivery(&self, delivery: &WebhookDelivery) -> WebhookResult<()> {
            if self.poisoned.lock().await.as_deref() == Some(delivery.id.as_str()) {
                return Err(WebhookError::Storage("disk full".into()));
            }
            self.inner.save_delivery(delivery).await
        }

        async fn get_delivery(&self, id: &str) -> WebhookResult<Option<WebhookDelivery>> {
            self.inner.get_delivery(id).await
        }

        async fn list_deliveries(&self, filter: &DeliveryFilter) -> WebhookResult<Vec<WebhookDelivery>> {
            self.inner.list_deliveries(filter).await
        }

        async fn deliveries_for_subscription(
            &self,
            subscription_id: &str,
        ) -> WebhookResult<Vec<WebhookDelivery>> {
            self.inner.deliveries_for_subscription(subscription_id).await
        }

        async fn list_retryable(
            &self,
            max_attempts: u32,
            pending_before: DateTime<Utc>,
        ) -> WebhookResult<Vec<WebhookDelivery>> {
            self.inner.list_retryable(max_attempts, pending_before).await
        }
    }

    #[tokio::test]
    async fn test_retry_due_continues_past_storage_error() {
        let storage = Arc::new(PoisonedStorage {
            inner: InMemoryWebhookStorage::new(),
            poisoned: Mutex::new(None),
        });
        let registry = SubscriptionRegistry::new(storage.clone());
        let dispatcher = WebhookDispatcher::new(storage.clone(), Arc::new(ScriptedTransport::default()));

        let created = registry
            .create("org-1", "https://example.com/hook", vec!["order.created".into()], "user-1")
            .await
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let mut delivery = WebhookDelivery::new(&created.subscription, "order.created", Value::Null);
            delivery.mark_failed(Some(500), "HTTP 500");
            storage.save_delivery(&delivery).await.unwrap();
            ids.push(delivery.id);
        }
        *storage.poisoned.lock().await = Some(ids[0].clone());

        let later = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(dispatcher.retry_due(later).await.unwrap(), 1);

        let healthy = storage.get_delivery(&ids[1]).await.unwrap().unwrap();
        assert_eq!(healthy.status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn test_metrics_and_listing() {
        let f = fixture();
        let subscription = subscribe(&f, "org-1").await;

        let empty = f
            .dispatcher
            .get_subscription_metrics(&subscription.id, "org-1")
            .await
            .unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.success_rate, 0.0);

        failed_delivery(&f, &subscription, 1).await;
        let mut ok = WebhookDelivery::new(&subscription, "order.created", Value::Null);
        ok.mark_success(200, 80);
        f.storage.save_delivery(&ok).await.unwrap();

        let metrics = f
            .dispatcher
            .get_subscription_metrics(&subscription.id, "org-1")
            .await
            .unwrap();
        assert_eq!(metrics.total, 2);
        assert_eq!(metrics.success_rate, 0.5);
        assert_eq!(metrics.avg_latency_ms, 80.0);

        let failed = f
            .dispatcher
            .list_deliveries(&DeliveryFilter::for_org("org-1").status(DeliveryStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);

        assert!(matches!(
            f.dispatcher.get_subscription_metrics(&subscription.id, "org-2").await,
            Err(WebhookError::Unauthorized)
        ));
    }
}
