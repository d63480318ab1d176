//! # Franchise Webhooks
//!
//! Organization webhooks for the franchise platform:
//! - Subscription management with per-subscription signing secrets
//! - Event fan-out to active subscribers on background tasks
//! - HMAC-SHA256 signed pushes (`X-Webhook-Signature: sha256=<hex>`)
//! - Manual retry and automatic redelivery on the shared backoff table
//! - Per-subscription delivery metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use franchise_webhooks::{HttpTransport, InMemoryWebhookStorage, SubscriptionRegistry, WebhookDispatcher};
//!
//! let storage = Arc::new(InMemoryWebhookStorage::new());
//! let registry = SubscriptionRegistry::new(storage.clone());
//! let dispatcher = WebhookDispatcher::new(storage, Arc::new(HttpTransport::new(timeout)?));
//!
//! let created = registry
//!     .create("org-1", "https://hooks.example.com", vec!["order.created".into()], "user-1")
//!     .await?;
//! dispatcher.enqueue_event("order.created", "org-1", json!({"orderId": "o-1"})).await?;
//! ```

mod config;
mod delivery;
mod dispatcher;
mod error;
mod registry;
mod signature;
mod storage;
mod subscription;
mod transport;
mod validation;

pub use config::WebhookConfig;
pub use delivery::{
    DEFAULT_DELIVERY_PAGE, DeliveryFilter, DeliveryStatus, MAX_DELIVERY_PAGE, SubscriptionMetrics,
    WebhookDelivery,
};
pub use dispatcher::WebhookDispatcher;
pub use error::{WebhookError, WebhookResult};
pub use registry::{SubscriptionRegistry, generate_secret};
pub use signature::{
    EVENT_HEADER, ID_HEADER, SIGNATURE_HEADER, SignatureError, TIMESTAMP_HEADER, sign,
    signature_header, verify, verify_headers,
};
pub use storage::{InMemoryWebhookStorage, WebhookStorage};
pub use subscription::{
    CreatedSubscription, SubscriptionStatus, UpdateSubscription, WebhookSubscription,
};
#[cfg(feature = "http-client")]
pub use transport::HttpTransport;
pub use transport::{OutboundRequest, WebhookTransport};
pub use validation::{is_valid_event_type, validate_event_types, validate_url};
