//! Webhook subscriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// Receives events.
    Active,
    /// Receives nothing until re-enabled.
    Disabled,
}

/// An organization's registration of a URL for a set of event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscription {
    /// Unique identifier.
    pub id: String,
    /// Owning organization.
    pub org_id: String,
    /// Target URL.
    pub url: String,
    /// Subscribed event types.
    pub event_types: BTreeSet<String>,
    /// Signing secret. Only ever returned by creation and rotation.
    #[serde(skip_serializing, default)]
    pub secret: String,
    /// Status.
    pub status: SubscriptionStatus,
    /// Who created it.
    pub created_by: String,
    /// Created at.
    pub created_at: DateTime<Utc>,
    /// Updated at.
    pub updated_at: DateTime<Utc>,
    /// When it was last disabled.
    pub disabled_at: Option<DateTime<Utc>>,
}

impl WebhookSubscription {
    /// Creates an active subscription.
    pub fn new(
        org_id: impl Into<String>,
        url: impl Into<String>,
        event_types: impl IntoIterator<Item = impl Into<String>>,
        secret: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            org_id: org_id.into(),
            url: url.into(),
            event_types: event_types.into_iter().map(Into::into).collect(),
            secret: secret.into(),
            status: SubscriptionStatus::Active,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            disabled_at: None,
        }
    }

    /// Returns true if the subscription is active.
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Checks if this subscription should receive an event.
    pub fn should_receive(&self, event_type: &str) -> bool {
        self.is_active() && self.event_types.contains(event_type)
    }
}

/// Response to creation or secret rotation: the only place the secret
/// appears.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSubscription {
    /// The subscription.
    #[serde(flatten)]
    pub subscription: WebhookSubscription,
    /// Signing secret.
    pub secret: String,
    /// Reminder that the secret is not shown again.
    pub warning: &'static str,
}

impl CreatedSubscription {
    /// Warning returned with every secret.
    pub const WARNING: &'static str =
        "Store this secret securely. It will not be shown again.";

    pub(crate) fn new(subscription: WebhookSubscription) -> Self {
        Self {
            secret: subscription.secret.clone(),
            subscription,
            warning: Self::WARNING,
        }
    }
}

/// Partial update of a subscription.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscription {
    /// New target URL.
    pub url: Option<String>,
    /// New event types.
    pub event_types: Option<Vec<String>>,
}
