//! Subscription lifecycle: create, update, enable/disable, rotate secrets.

use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;

use crate::error::{WebhookError, WebhookResult};
use crate::storage::WebhookStorage;
use crate::subscription::{
    CreatedSubscription, SubscriptionStatus, UpdateSubscription, WebhookSubscription,
};
use crate::validation::{validate_event_types, validate_url};

/// `whsec_` followed by 32 random bytes from the OS, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("whsec_{}", hex::encode(bytes))
}

/// Loads a subscription and checks it belongs to `org_id`.
pub(crate) async fn load_owned(
    storage: &dyn WebhookStorage,
    id: &str,
    org_id: &str,
) -> WebhookResult<WebhookSubscription> {
    let subscription = storage
        .get_subscription(id)
        .await?
        .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))?;

    if subscription.org_id != org_id {
        tracing::warn!(
            subscription_id = %id,
            org_id = %org_id,
            "Cross-organization subscription access denied"
        );
        return Err(WebhookError::Unauthorized);
    }

    Ok(subscription)
}

/// Manages webhook subscriptions of organizations.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    storage: Arc<dyn WebhookStorage>,
}

impl SubscriptionRegistry {
    /// Creates a registry over a storage backend.
    pub fn new(storage: Arc<dyn WebhookStorage>) -> Self {
        Self { storage }
    }

    /// Registers a URL for a set of event types.
    ///
    /// The returned secret is not retrievable later.
    pub async fn create(
        &self,
        org_id: &str,
        url: &str,
        event_types: Vec<String>,
        created_by: &str,
    ) -> WebhookResult<CreatedSubscription> {
        validate_url(url)?;
        validate_event_types(&event_types)?;

        let subscription =
            WebhookSubscription::new(org_id, url, event_types, generate_secret(), created_by);
        self.storage.save_subscription(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            org_id = %org_id,
            url = %url,
            "Webhook subscription created"
        );
        Ok(CreatedSubscription::new(subscription))
    }

    /// Lists an organization's subscriptions, newest first.
    pub async fn list(&self, org_id: &str) -> WebhookResult<Vec<WebhookSubscription>> {
        self.storage.list_subscriptions(org_id).await
    }

    /// Gets one subscription.
    pub async fn get(&self, id: &str, org_id: &str) -> WebhookResult<WebhookSubscription> {
        load_owned(self.storage.as_ref(), id, org_id).await
    }

    /// Changes the URL and/or event types.
    pub async fn update(
        &self,
        id: &str,
        org_id: &str,
        update: UpdateSubscription,
    ) -> WebhookResult<WebhookSubscription> {
        let mut subscription = load_owned(self.storage.as_ref(), id, org_id).await?;

        if let Some(url) = update.url {
            validate_url(&url)?;
            subscription.url = url;
        }
        if let Some(event_types) = update.event_types {
            validate_event_types(&event_types)?;
            subscription.event_types = event_types.into_iter().collect();
        }

        subscription.updated_at = Utc::now();
        self.storage.save_subscription(&subscription).await?;
        Ok(subscription)
    }

    /// Stops future dispatch to a subscription.
    pub async fn disable(&self, id: &str, org_id: &str) -> WebhookResult<WebhookSubscription> {
        let mut subscription = load_owned(self.storage.as_ref(), id, org_id).await?;
        if subscription.status == SubscriptionStatus::Disabled {
            return Err(WebhookError::validation("Subscription is already disabled"));
        }

        let now = Utc::now();
        subscription.status = SubscriptionStatus::Disabled;
        subscription.disabled_at = Some(now);
        subscription.updated_at = now;
        self.storage.save_subscription(&subscription).await?;

        tracing::info!(subscription_id = %id, org_id = %org_id, "Webhook subscription disabled");
        Ok(subscription)
    }

    /// Resumes dispatch to a subscription.
    pub async fn enable(&self, id: &str, org_id: &str) -> WebhookResult<WebhookSubscription> {
        let mut subscription = load_owned(self.storage.as_ref(), id, org_id).await?;
        if subscription.status == SubscriptionStatus::Active {
            return Err(WebhookError::validation("Subscription is already active"));
        }

        subscription.status = SubscriptionStatus::Active;
        subscription.disabled_at = None;
        subscription.updated_at = Utc::now();
        self.storage.save_subscription(&subscription).await?;

        tracing::info!(subscription_id = %id, org_id = %org_id, "Webhook subscription enabled");
        Ok(subscription)
    }

    /// Replaces the signing secret. The old one stops working at once.
    pub async fn regenerate_secret(
        &self,
        id: &str,
        org_id: &str,
    ) -> WebhookResult<CreatedSubscription> {
        let mut subscription = load_owned(self.storage.as_ref(), id, org_id).await?;
        subscription.secret = generate_secret();
        subscription.updated_at = Utc::now();
        self.storage.save_subscription(&subscription).await?;

        tracing::info!(subscription_id = %id, org_id = %org_id, "Webhook secret rotated");
        Ok(CreatedSubscription::new(subscription))
    }
}
