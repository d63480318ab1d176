//! Delivery records, listing filters and per-subscription metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::subscription::WebhookSubscription;

/// Delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Created, not attempted yet.
    Pending,
    /// Delivered with a 2xx response. Immutable.
    Success,
    /// Last attempt failed.
    Failed,
}

/// One event sent (or to be sent) to one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    /// Delivery ID, also sent as `X-Webhook-Id`.
    pub id: String,
    /// Subscription ID.
    pub subscription_id: String,
    /// Owning organization.
    pub org_id: String,
    /// Event type.
    pub event_type: String,
    /// Event data.
    pub payload: Value,
    /// Status.
    pub status: DeliveryStatus,
    /// Attempts made so far.
    pub attempts: u32,
    /// Round trip of the successful attempt.
    pub latency_ms: Option<u64>,
    /// Error of the last failed attempt.
    pub last_error: Option<String>,
    /// HTTP status of the last response.
    pub response_status: Option<u16>,
    /// Created at.
    pub created_at: DateTime<Utc>,
    /// When the last attempt finished.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    /// Creates a pending delivery of `event_type` to `subscription`.
    pub fn new(subscription: &WebhookSubscription, event_type: &str, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: subscription.id.clone(),
            org_id: subscription.org_id.clone(),
            event_type: event_type.to_string(),
            payload,
            status: DeliveryStatus::Pending,
            attempts: 0,
            latency_ms: None,
            last_error: None,
            response_status: None,
            created_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    /// JSON envelope pushed to the subscriber.
    pub fn envelope(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "type": self.event_type,
            "orgId": self.org_id,
            "timestamp": self.created_at.to_rfc3339(),
            "data": self.payload,
        })
    }

    /// Records a 2xx response.
    pub fn mark_success(&mut self, status: u16, latency_ms: u64) {
        self.attempts += 1;
        self.status = DeliveryStatus::Success;
        self.response_status = Some(status);
        self.latency_ms = Some(latency_ms);
        self.last_error = None;
        self.last_attempt_at = Some(Utc::now());
    }

    /// Records a failed attempt.
    pub fn mark_failed(&mut self, response_status: Option<u16>, error: impl Into<String>) {
        self.attempts += 1;
        self.status = DeliveryStatus::Failed;
        self.response_status = response_status;
        self.last_error = Some(error.into());
        self.last_attempt_at = Some(Utc::now());
    }
}

/// Maximum page size of a delivery listing.
pub const MAX_DELIVERY_PAGE: usize = 100;
/// Page size when none is given.
pub const DEFAULT_DELIVERY_PAGE: usize = 50;

/// Filter for listing deliveries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFilter {
    /// Owning organization.
    #[serde(default)]
    pub org_id: String,
    /// Restrict to one subscription.
    pub subscription_id: Option<String>,
    /// Restrict to one status.
    pub status: Option<DeliveryStatus>,
    /// Page size.
    pub limit: Option<usize>,
}

impl DeliveryFilter {
    /// Creates a filter for an organization.
    pub fn for_org(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            ..Default::default()
        }
    }

    /// Restricts to one subscription.
    pub fn subscription(mut self, id: impl Into<String>) -> Self {
        self.subscription_id = Some(id.into());
        self
    }

    /// Restricts to one status.
    pub fn status(mut self, status: DeliveryStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the page size.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Page size after defaults and the cap.
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            None | Some(0) => DEFAULT_DELIVERY_PAGE,
            Some(n) => n.min(MAX_DELIVERY_PAGE),
        }
    }

    /// Checks a delivery against the filter.
    pub fn matches(&self, delivery: &WebhookDelivery) -> bool {
        delivery.org_id == self.org_id
            && self
                .subscription_id
                .as_ref()
                .is_none_or(|id| &delivery.subscription_id == id)
            && self.status.is_none_or(|s| delivery.status == s)
    }
}

/// Delivery statistics of one subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionMetrics {
    /// Subscription ID.
    pub subscription_id: String,
    /// All deliveries.
    pub total: u64,
    /// Delivered.
    pub successful: u64,
    /// Failed on the last attempt.
    pub failed: u64,
    /// Not attempted yet.
    pub pending: u64,
    /// `successful / total`, 0 when there are no deliveries.
    pub success_rate: f64,
    /// Mean latency of deliveries with a recorded latency, 0 when none.
    pub avg_latency_ms: f64,
}

impl SubscriptionMetrics {
    /// Aggregates the deliveries of a subscription.
    pub fn from_deliveries(subscription_id: &str, deliveries: &[WebhookDelivery]) -> Self {
        let mut metrics = Self {
            subscription_id: subscription_id.to_string(),
            total: deliveries.len() as u64,
            successful: 0,
            failed: 0,
            pending: 0,
            success_rate: 0.0,
            avg_latency_ms: 0.0,
        };

        let mut latency_sum = 0u64;
        let mut latency_count = 0u64;
        for delivery in deliveries {
            match delivery.status {
                DeliveryStatus::Success => metrics.successful += 1,
                DeliveryStatus::Failed => metrics.failed += 1,
                DeliveryStatus::Pending => metrics.pending += 1,
            }
            if let Some(latency) = delivery.latency_ms {
                latency_sum += latency;
                latency_count += 1;
            }
        }

        if metrics.total > 0 {
            metrics.success_rate = metrics.successful as f64 / metrics.total as f64;
        }
        if latency_count > 0 {
            metrics.avg_latency_ms = latency_sum as f64 / latency_count as f64;
        }
        metrics
    }
}
