//! Integration tests for the storefront and fulfillment HTTP servers.
//!
//! Both services run in-process against the in-memory broker.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::FulfillmentState;
use api::auth::USERNAME_HEADER;
use api::catalog::InMemoryProductCatalog;
use api::routes::orders::AppState;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use broker::{BrokerConfig, ConnectionManager, InMemoryBroker, ReconnectPolicy};
use common::{OrderId, ProductRef};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::InMemoryOrderStore;
use saga::{CompletionConsumer, FulfillmentConsumer, PendingOrder};
use tokio::task::JoinHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn broker_config() -> BrokerConfig {
    BrokerConfig {
        reconnect: ReconnectPolicy::with_unit(Duration::from_millis(1)),
        ..BrokerConfig::default()
    }
}

fn catalog() -> InMemoryProductCatalog {
    InMemoryProductCatalog::new([
        ProductRef::new("p1", "Pen", 10.0),
        ProductRef::new("p2", "Pad", 15.0),
    ])
}

struct TestApp {
    app: Router,
    state: Arc<AppState>,
    broker: InMemoryBroker,
    store: InMemoryOrderStore,
    tasks: Vec<JoinHandle<()>>,
}

impl TestApp {
    /// Storefront whose broker connection is never established.
    fn disconnected(wait: Duration) -> Self {
        let broker = InMemoryBroker::new();
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(broker.clone()),
            broker_config(),
        ));
        let state = api::create_storefront_state(manager, Arc::new(catalog()), wait);
        let app = api::create_storefront_app(state.clone(), get_metrics_handle());
        Self {
            app,
            state,
            broker,
            store: InMemoryOrderStore::new(),
            tasks: Vec::new(),
        }
    }

    /// Connected storefront without a fulfillment service.
    async fn storefront_only(wait: Duration) -> Self {
        let mut test = Self::disconnected(wait);
        let manager = test.state.broker.clone();
        test.tasks.push(manager.spawn());
        test.tasks
            .push(CompletionConsumer::new(test.state.registry.clone()).spawn(manager.clone()));
        manager.wait_for_channel(None).await.unwrap();
        test
    }

    /// Storefront and fulfillment service sharing one broker.
    async fn new() -> Self {
        let mut test = Self::storefront_only(Duration::from_secs(5)).await;
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(test.broker.clone()),
            broker_config(),
        ));
        test.tasks.push(manager.spawn());
        test.tasks
            .push(FulfillmentConsumer::new(manager.clone(), test.store.clone()).spawn());
        manager.wait_for_channel(None).await.unwrap();
        test
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn buy_request(user: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/buy")
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header(USERNAME_HEADER, user);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header(USERNAME_HEADER, user);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_buy_returns_fulfilled_order() {
    let test = TestApp::new().await;

    let (status, json) = test
        .send(buy_request(
            Some("alice"),
            serde_json::json!({ "ids": ["p1", "p2"] }),
        ))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "completed");
    assert_eq!(json["username"], "alice");
    assert_eq!(json["user"], "alice");
    assert_eq!(json["totalPrice"].as_f64(), Some(25.0));
    assert_eq!(json["products"].as_array().unwrap().len(), 2);
    assert!(json["orderId"].as_str().is_some());
    assert_eq!(test.store.order_count().await, 1);
}

#[tokio::test]
async fn test_buy_skips_unknown_products() {
    let test = TestApp::new().await;

    let (status, json) = test
        .send(buy_request(
            Some("alice"),
            serde_json::json!({ "ids": ["p1", "nope"] }),
        ))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["totalPrice"].as_f64(), Some(10.0));
    assert_eq!(json["products"][0]["id"], "p1");
}

#[tokio::test]
async fn test_buy_without_identity_is_unauthorized() {
    let test = TestApp::new().await;

    let (status, _) = test
        .send(buy_request(None, serde_json::json!({ "ids": ["p1"] })))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(test.state.registry.is_empty().await);
}

#[tokio::test]
async fn test_buy_rejects_bad_input() {
    let test = TestApp::new().await;

    for body in [
        serde_json::json!({ "ids": [] }),
        serde_json::json!({}),
        serde_json::json!({ "ids": ["nope"] }),
        serde_json::json!({ "ids": "p1" }),
    ] {
        let (status, json) = test.send(buy_request(Some("alice"), body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().is_some());
    }
    assert!(test.state.registry.is_empty().await);
}

#[tokio::test]
async fn test_buy_times_out_without_fulfillment() {
    let test = TestApp::storefront_only(Duration::from_millis(50)).await;

    let (status, _) = test
        .send(buy_request(Some("alice"), serde_json::json!({ "ids": ["p1"] })))
        .await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(test.broker.queue_len("orders"), 1);
}

#[tokio::test]
async fn test_buy_fails_while_broker_is_down() {
    let test = TestApp::disconnected(Duration::from_secs(5));

    let (status, _) = test
        .send(buy_request(Some("alice"), serde_json::json!({ "ids": ["p1"] })))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(test.state.registry.len().await, 1);
}

#[tokio::test]
async fn test_invoice_of_completed_order() {
    let test = TestApp::new().await;
    let (_, order) = test
        .send(buy_request(
            Some("alice"),
            serde_json::json!({ "ids": ["p1", "p2"] }),
        ))
        .await;
    let order_id = order["orderId"].as_str().unwrap();

    let (status, invoice) = test
        .send(get(&format!("/invoice/{order_id}"), Some("alice")))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(invoice["orderId"], order_id);
    assert_eq!(invoice["username"], "alice");
    assert_eq!(invoice["user"], "alice");
    assert_eq!(invoice["status"], "completed");
    assert_eq!(invoice["totalPrice"].as_f64(), Some(25.0));
    assert_eq!(invoice["products"][1]["name"], "Pad");
    assert!(invoice["createdAt"].as_str().is_some());
}

#[tokio::test]
async fn test_invoice_of_pending_order_is_bad_request() {
    let test = TestApp::disconnected(Duration::from_secs(5));
    let order_id = OrderId::new();
    test.state
        .registry
        .register(PendingOrder::new(
            order_id,
            "alice",
            vec![ProductRef::new("p1", "Pen", 10.0)],
        ))
        .await
        .unwrap();

    let (status, json) = test
        .send(get(&format!("/invoice/{order_id}"), Some("alice")))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "pending");
}

#[tokio::test]
async fn test_invoice_of_unknown_order_is_not_found() {
    let test = TestApp::disconnected(Duration::from_secs(5));

    let (status, _) = test
        .send(get(&format!("/invoice/{}", OrderId::new()), Some("alice")))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = test.send(get("/invoice/unknown-id", Some("alice"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invoice_requires_identity() {
    let test = TestApp::disconnected(Duration::from_secs(5));

    let (status, _) = test
        .send(get(&format!("/invoice/{}", OrderId::new()), None))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_order_status_lookup() {
    let test = TestApp::disconnected(Duration::from_secs(5));
    let order_id = OrderId::new();
    test.state
        .registry
        .register(PendingOrder::new(
            order_id,
            "bob",
            vec![ProductRef::new("p2", "Pad", 15.0)],
        ))
        .await
        .unwrap();

    let (status, json) = test.send(get(&format!("/orders/{order_id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "pending");
    assert_eq!(json["username"], "bob");
    assert!(json.get("totalPrice").is_none());

    let (status, _) = test
        .send(get(&format!("/orders/{}", OrderId::new()), None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_storefront_health() {
    let test = TestApp::storefront_only(Duration::from_secs(5)).await;

    let (status, json) = test.send(get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["brokerConnected"], true);
    assert_eq!(json["catalogConnected"], true);
}

#[tokio::test]
async fn test_storefront_health_degraded_without_broker() {
    let test = TestApp::disconnected(Duration::from_secs(5));

    let (status, json) = test.send(get("/health", None)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["brokerConnected"], false);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let test = TestApp::disconnected(Duration::from_secs(5));

    let response = test
        .app
        .clone()
        .oneshot(get("/metrics", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_fulfillment_health_tracks_store() {
    let broker = InMemoryBroker::new();
    let manager = Arc::new(ConnectionManager::new(
        Arc::new(broker.clone()),
        broker_config(),
    ));
    manager.connect().await.unwrap();
    let store = InMemoryOrderStore::new();
    let state = Arc::new(FulfillmentState {
        broker: manager,
        store: Arc::new(store.clone()),
    });
    let app = api::create_fulfillment_app(state, get_metrics_handle());

    let response = app.clone().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["storeConnected"], true);
    assert_eq!(json["brokerConnected"], true);

    store.set_unavailable(true);
    let response = app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
