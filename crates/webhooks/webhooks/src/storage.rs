//! Webhook storage trait for persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::delivery::{DeliveryFilter, DeliveryStatus, WebhookDelivery};
use crate::error::WebhookResult;
use crate::subscription::WebhookSubscription;

/// Trait for webhook storage backends.
#[async_trait]
pub trait WebhookStorage: Send + Sync {
    // ==================== Subscription Operations ====================

    /// Saves a subscription, replacing any previous version.
    async fn save_subscription(&self, subscription: &WebhookSubscription) -> WebhookResult<()>;

    /// Gets a subscription by ID.
    async fn get_subscription(&self, id: &str) -> WebhookResult<Option<WebhookSubscription>>;

    /// Lists the subscriptions of an organization, newest first.
    async fn list_subscriptions(&self, org_id: &str) -> WebhookResult<Vec<WebhookSubscription>>;

    /// Active subscriptions of `org_id` that include `event_type`.
    async fn find_subscribers(
        &self,
        org_id: &str,
        event_type: &str,
    ) -> WebhookResult<Vec<WebhookSubscription>>;

    // ==================== Delivery Operations ====================

    /// Saves a delivery, replacing any previous version.
    async fn save_delivery(&self, delivery: &WebhookDelivery) -> WebhookResult<()>;

    /// Gets a delivery by ID.
    async fn get_delivery(&self, id: &str) -> WebhookResult<Option<WebhookDelivery>>;

    /// Deliveries matching the filter, newest first, capped by its limit.
    async fn list_deliveries(&self, filter: &DeliveryFilter) -> WebhookResult<Vec<WebhookDelivery>>;

    /// All deliveries of a subscription.
    async fn deliveries_for_subscription(
        &self,
        subscription_id: &str,
    ) -> WebhookResult<Vec<WebhookDelivery>>;

    /// Deliveries redelivery should look at: failed ones with fewer than
    /// `max_attempts` attempts, and pending ones created before
    /// `pending_before` whose first push never completed.
    async fn list_retryable(
        &self,
        max_attempts: u32,
        pending_before: DateTime<Utc>,
    ) -> WebhookResult<Vec<WebhookDelivery>>;
}

/// In-memory webhook storage for testing and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryWebhookStorage {
    subscriptions: RwLock<HashMap<String, WebhookSubscription>>,
    deliveries: RwLock<HashMap<String, WebhookDelivery>>,
}

impl InMemoryWebhookStorage {
    /// Creates a new in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookStorage for InMemoryWebhookStorage {
    async fn save_subscription(&self, subscription: &WebhookSubscription) -> WebhookResult<()> {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> WebhookResult<Option<WebhookSubscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.get(id).cloned())
    }

    async fn list_subscriptions(&self, org_id: &str) -> WebhookResult<Vec<WebhookSubscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut found: Vec<_> = subscriptions
            .values()
            .filter(|s| s.org_id == org_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn find_subscribers(
        &self,
        org_id: &str,
        event_type: &str,
    ) -> WebhookResult<Vec<WebhookSubscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .filter(|s| s.org_id == org_id && s.should_receive(event_type))
            .cloned()
            .collect())
    }

    async fn save_delivery(&self, delivery: &WebhookDelivery) -> WebhookResult<()> {
        let mut deliveries = self.deliveries.write().await;
        deliveries.insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    async fn get_delivery(&self, id: &str) -> WebhookResult<Option<WebhookDelivery>> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries.get(id).cloned())
    }

    async fn list_deliveries(&self, filter: &DeliveryFilter) -> WebhookResult<Vec<WebhookDelivery>> {
        let deliveries = self.deliveries.read().await;
        let mut found: Vec<_> = deliveries
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(filter.effective_limit());
        Ok(found)
    }

    async fn deliveries_for_subscription(
        &self,
        subscription_id: &str,
    ) -> WebhookResult<Vec<WebhookDelivery>> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries
            .values()
            .filter(|d| d.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn list_retryable(
        &self,
        max_attempts: u32,
        pending_before: DateTime<Utc>,
    ) -> WebhookResult<Vec<WebhookDelivery>> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries
            .values()
            .filter(|d| match d.status {
                DeliveryStatus::Failed => d.attempts < max_attempts,
                DeliveryStatus::Pending => d.created_at < pending_before,
                DeliveryStatus::Success => false,
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn subscription(org: &str, events: &[&str]) -> WebhookSubscription {
        WebhookSubscription::new(
            org,
            "https://example.com/hook",
            events.iter().copied(),
            "whsec_x",
            "user-1",
        )
    }

    #[tokio::test]
    async fn test_find_subscribers_scopes_by_org_and_event() {
        let storage = InMemoryWebhookStorage::new();
        storage.save_subscription(&subscription("org-1", &["order.created"])).await.unwrap();
        storage.save_subscription(&subscription("org-1", &["stock.low"])).await.unwrap();
        storage.save_subscription(&subscription("org-2", &["order.created"])).await.unwrap();

        let found = storage.find_subscribers("org-1", "order.created").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].org_id, "org-1");
    }

    #[tokio::test]
    async fn test_list_deliveries_newest_first_and_capped() {
        let storage = InMemoryWebhookStorage::new();
        let sub = subscription("org-1", &["order.created"]);

        for i in 0..5 {
            let mut delivery = WebhookDelivery::new(&sub, "order.created", Value::from(i));
            delivery.created_at += chrono::Duration::seconds(i);
            storage.save_delivery(&delivery).await.unwrap();
        }

        let page = storage
            .list_deliveries(&DeliveryFilter::for_org("org-1").limit(3))
            .await
            .unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].payload, Value::from(4));
        assert!(page.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let other_org = storage.list_deliveries(&DeliveryFilter::for_org("org-2")).await.unwrap();
        assert!(other_org.is_empty());
    }

    #[tokio::test]
    async fn test_list_retryable_includes_stale_pending() {
        let storage = InMemoryWebhookStorage::new();
        let sub = subscription("org-1", &["order.created"]);

        let pending = WebhookDelivery::new(&sub, "order.created", Value::Null);
        storage.save_delivery(&pending).await.unwrap();

        let mut failed = WebhookDelivery::new(&sub, "order.created", Value::Null);
        failed.mark_failed(Some(500), "HTTP 500");
        storage.save_delivery(&failed).await.unwrap();

        let mut spent = WebhookDelivery::new(&sub, "order.created", Value::Null);
        for _ in 0..5 {
            spent.mark_failed(Some(500), "HTTP 500");
        }
        storage.save_delivery(&spent).await.unwrap();

        let fresh = storage.list_retryable(5, pending.created_at).await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, failed.id);

        let cutoff = pending.created_at + chrono::Duration::seconds(1);
        let mut stale: Vec<String> = storage
            .list_retryable(5, cutoff)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        stale.sort();
        let mut expected = vec![pending.id.clone(), failed.id.clone()];
        expected.sort();
        assert_eq!(stale, expected);
    }
}
