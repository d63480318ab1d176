//! Webhook management routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use franchise_webhooks::{
    CreatedSubscription, DeliveryFilter, DeliveryStatus, SubscriptionMetrics, SubscriptionRegistry,
    UpdateSubscription, WebhookDelivery, WebhookDispatcher, WebhookSubscription,
};
use serde::Deserialize;

use crate::ApiError;
use crate::extractor::Caller;

/// Creates an Axum router with the webhook management routes.
///
/// Every route is scoped to the caller's organization.
///
/// # Example
///
/// ```rust,ignore
/// let app = Router::new().merge(webhook_routes(registry, dispatcher));
/// ```
pub fn webhook_routes<S>(registry: SubscriptionRegistry, dispatcher: WebhookDispatcher) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/webhooks", post(create_subscription).get(list_subscriptions))
        .route("/webhooks/deliveries", get(list_deliveries))
        .route("/webhooks/deliveries/{id}/retry", post(retry_delivery))
        .route("/webhooks/{id}", get(get_subscription).patch(update_subscription))
        .route("/webhooks/{id}/disable", post(disable_subscription))
        .route("/webhooks/{id}/enable", post(enable_subscription))
        .route("/webhooks/{id}/regenerate-secret", post(regenerate_secret))
        .route("/webhooks/{id}/metrics", get(subscription_metrics))
        .with_state(WebhookState {
            registry,
            dispatcher,
        })
}

/// Shared state for webhook routes.
#[derive(Clone)]
struct WebhookState {
    registry: SubscriptionRegistry,
    dispatcher: WebhookDispatcher,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionRequest {
    url: String,
    event_types: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryQuery {
    subscription_id: Option<String>,
    status: Option<DeliveryStatus>,
    limit: Option<usize>,
}

type ApiResult<T> = Result<T, ApiError>;

async fn create_subscription(
    caller: Caller,
    State(state): State<WebhookState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<CreatedSubscription>)> {
    let created = state
        .registry
        .create(caller.org()?, &request.url, request.event_types, &caller.subject_id)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_subscriptions(
    caller: Caller,
    State(state): State<WebhookState>,
) -> ApiResult<Json<Vec<WebhookSubscription>>> {
    Ok(Json(state.registry.list(caller.org()?).await?))
}

async fn get_subscription(
    caller: Caller,
    State(state): State<WebhookState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WebhookSubscription>> {
    Ok(Json(state.registry.get(&id, caller.org()?).await?))
}

async fn update_subscription(
    caller: Caller,
    State(state): State<WebhookState>,
    Path(id): Path<String>,
    Json(update): Json<UpdateSubscription>,
) -> ApiResult<Json<WebhookSubscription>> {
    Ok(Json(state.registry.update(&id, caller.org()?, update).await?))
}

async fn disable_subscription(
    caller: Caller,
    State(state): State<WebhookState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WebhookSubscription>> {
    Ok(Json(state.registry.disable(&id, caller.org()?).await?))
}

async fn enable_subscription(
    caller: Caller,
    State(state): State<WebhookState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WebhookSubscription>> {
    Ok(Json(state.registry.enable(&id, caller.org()?).await?))
}

async fn regenerate_secret(
    caller: Caller,
    State(state): State<WebhookState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CreatedSubscription>> {
    Ok(Json(state.registry.regenerate_secret(&id, caller.org()?).await?))
}

async fn subscription_metrics(
    caller: Caller,
    State(state): State<WebhookState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubscriptionMetrics>> {
    Ok(Json(
        state
            .dispatcher
            .get_subscription_metrics(&id, caller.org()?)
            .await?,
    ))
}

async fn list_deliveries(
    caller: Caller,
    State(state): State<WebhookState>,
    Query(query): Query<DeliveryQuery>,
) -> ApiResult<Json<Vec<WebhookDelivery>>> {
    let filter = DeliveryFilter {
        org_id: caller.org()?.to_string(),
        subscription_id: query.subscription_id,
        status: query.status,
        limit: query.limit,
    };
    Ok(Json(state.dispatcher.list_deliveries(&filter).await?))
}

async fn retry_delivery(
    caller: Caller,
    State(state): State<WebhookState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WebhookDelivery>> {
    Ok(Json(state.dispatcher.retry_delivery(&id, caller.org()?).await?))
}
