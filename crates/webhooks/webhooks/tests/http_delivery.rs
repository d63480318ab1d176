//! End-to-end pushes through `HttpTransport` against a mock HTTP server.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use franchise_webhooks::{
    DeliveryStatus, HttpTransport, InMemoryWebhookStorage, SubscriptionRegistry, WebhookDelivery,
    WebhookDispatcher, WebhookStorage, verify_headers,
};

struct Harness {
    storage: Arc<InMemoryWebhookStorage>,
    registry: SubscriptionRegistry,
    dispatcher: WebhookDispatcher,
}

fn harness(timeout: Duration) -> Harness {
    let storage = Arc::new(InMemoryWebhookStorage::new());
    let transport = Arc::new(HttpTransport::new(timeout).unwrap());
    Harness {
        registry: SubscriptionRegistry::new(storage.clone()),
        dispatcher: WebhookDispatcher::new(storage.clone(), transport),
        storage,
    }
}

async fn wait_settled(storage: &InMemoryWebhookStorage, id: &str) -> WebhookDelivery {
    for _ in 0..200 {
        let delivery = storage.get_delivery(id).await.unwrap().unwrap();
        if delivery.status != DeliveryStatus::Pending {
            return delivery;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("delivery {id} was never attempted");
}

#[tokio::test]
async fn test_signed_push_reaches_subscriber() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .and(header_exists("x-webhook-signature"))
        .and(header_exists("x-webhook-timestamp"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(Duration::from_secs(5));
    let created = h
        .registry
        .create(
            "org-1",
            &format!("{}/hooks/orders", server.uri()),
            vec!["order.created".into()],
            "user-1",
        )
        .await
        .unwrap();

    let deliveries = h
        .dispatcher
        .enqueue_event("order.created", "org-1", json!({"orderId": "o-42", "total": 1250}))
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 1);

    let delivery = wait_settled(&h.storage, &deliveries[0].id).await;
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.response_status, Some(200));
    assert_eq!(delivery.attempts, 1);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let signature = request.headers.get("x-webhook-signature").unwrap().to_str().unwrap();
    let timestamp = request.headers.get("x-webhook-timestamp").unwrap().to_str().unwrap();
    assert_eq!(
        request.headers.get("x-webhook-id").unwrap().to_str().unwrap(),
        delivery.id
    );
    assert_eq!(
        request.headers.get("x-webhook-event").unwrap().to_str().unwrap(),
        "order.created"
    );

    verify_headers(signature, timestamp, &created.secret, &request.body, 300).unwrap();

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["id"], delivery.id);
    assert_eq!(body["data"]["orderId"], "o-42");
}

#[tokio::test]
async fn test_server_error_then_manual_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let h = harness(Duration::from_secs(5));
    h.registry
        .create("org-1", &server.uri(), vec!["order.created".into()], "user-1")
        .await
        .unwrap();

    let deliveries = h
        .dispatcher
        .enqueue_event("order.created", "org-1", json!({}))
        .await
        .unwrap();
    let failed = wait_settled(&h.storage, &deliveries[0].id).await;
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("HTTP 500"));

    let retried = h.dispatcher.retry_delivery(&failed.id, "org-1").await.unwrap();
    assert_eq!(retried.status, DeliveryStatus::Success);
    assert_eq!(retried.response_status, Some(204));
    assert_eq!(retried.attempts, 2);
}

#[tokio::test]
async fn test_redirect_is_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "http://169.254.169.254/latest"),
        )
        .mount(&server)
        .await;

    let h = harness(Duration::from_secs(5));
    h.registry
        .create("org-1", &server.uri(), vec!["order.created".into()], "user-1")
        .await
        .unwrap();

    let deliveries = h
        .dispatcher
        .enqueue_event("order.created", "org-1", json!({}))
        .await
        .unwrap();
    let delivery = wait_settled(&h.storage, &deliveries[0].id).await;

    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.response_status, Some(302));
}

#[tokio::test]
async fn test_slow_subscriber_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let h = harness(Duration::from_millis(200));
    h.registry
        .create("org-1", &server.uri(), vec!["order.created".into()], "user-1")
        .await
        .unwrap();

    let deliveries = h
        .dispatcher
        .enqueue_event("order.created", "org-1", json!({}))
        .await
        .unwrap();
    let delivery = wait_settled(&h.storage, &deliveries[0].id).await;

    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.response_status, None);
    assert!(delivery.last_error.is_some());
}
