//! End-to-end tests of the order saga over the in-memory broker: storefront
//! publisher and completion consumer on one connection, fulfillment
//! consumer on another.

use std::sync::Arc;
use std::time::Duration;

use broker::{BrokerConfig, ConnectionManager, InMemoryBroker, ReconnectPolicy};
use common::{OrderCompletion, OrderId, OrderRequest, ProductRef};
use order_store::{InMemoryOrderStore, OrderStore};
use saga::{
    CompletionConsumer, FulfillmentConsumer, OrderPublisher, OrderStatus, PendingOrderRegistry,
    SagaError,
};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct TestHarness {
    broker: InMemoryBroker,
    store: InMemoryOrderStore,
    registry: Arc<PendingOrderRegistry>,
    publisher: OrderPublisher,
    storefront: Arc<ConnectionManager>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestHarness {
    fn config() -> BrokerConfig {
        BrokerConfig {
            reconnect: ReconnectPolicy::with_unit(Duration::from_millis(1)),
            ..BrokerConfig::default()
        }
    }

    /// Storefront side only: no fulfillment service is running.
    async fn storefront_only() -> Self {
        let broker = InMemoryBroker::new();
        let storefront = Arc::new(ConnectionManager::new(
            Arc::new(broker.clone()),
            Self::config(),
        ));
        let registry = Arc::new(PendingOrderRegistry::new());
        let publisher = OrderPublisher::new(storefront.clone(), registry.clone());

        let tasks = vec![
            storefront.spawn(),
            CompletionConsumer::new(registry.clone()).spawn(storefront.clone()),
        ];
        storefront.wait_for_channel(None).await.unwrap();

        Self {
            broker,
            store: InMemoryOrderStore::new(),
            registry,
            publisher,
            storefront,
            tasks,
        }
    }

    /// Both services running against the same broker.
    async fn new() -> Self {
        let mut harness = Self::storefront_only().await;
        harness.start_fulfillment().await;
        harness
    }

    async fn start_fulfillment(&mut self) {
        let fulfillment = Arc::new(ConnectionManager::new(
            Arc::new(self.broker.clone()),
            Self::config(),
        ));
        self.tasks.push(fulfillment.spawn());
        self.tasks.push(
            FulfillmentConsumer::new(fulfillment.clone(), self.store.clone())
                .with_redelivery_delay(Duration::from_millis(5))
                .spawn(),
        );
        fulfillment.wait_for_channel(None).await.unwrap();
    }

    async fn buy(&self, username: &str, products: Vec<ProductRef>) -> saga::Result<saga::PendingOrder> {
        let order_id = self.publisher.submit_order(username, products).await?;
        self.registry.await_completion(order_id, WAIT).await
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn pen_and_pad() -> Vec<ProductRef> {
    vec![
        ProductRef::new("p1", "Pen", 10.0),
        ProductRef::new("p2", "Pad", 15.0).with_description("A5, ruled"),
    ]
}

#[tokio::test]
async fn test_happy_path_purchase_to_invoice() {
    let h = TestHarness::new().await;

    let order = h.buy("alice", pen_and_pad()).await.unwrap();

    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.total_price(), Some(25.0));
    assert_eq!(order.products, pen_and_pad());

    let persisted = h.store.get(order.order_id).await.unwrap().unwrap();
    assert_eq!(persisted.total_price, 25.0);
    assert_eq!(persisted.user, "alice");

    let invoice = h.registry.get_invoice(order.order_id).await.unwrap();
    assert_eq!(invoice.order_id, order.order_id);
    assert_eq!(invoice.username, "alice");
    assert_eq!(invoice.total_price, 25.0);
    assert_eq!(invoice.status, OrderStatus::Completed);
    assert_eq!(invoice.products.len(), 2);
    assert_eq!(invoice.products[1].description.as_deref(), Some("A5, ruled"));
}

#[tokio::test]
async fn test_invoice_before_completion_is_not_ready() {
    let h = TestHarness::storefront_only().await;

    let order_id = h.publisher.submit_order("alice", pen_and_pad()).await.unwrap();
    let result = h.registry.get_invoice(order_id).await;

    assert!(matches!(
        result,
        Err(SagaError::NotReady {
            status: OrderStatus::Pending,
            ..
        })
    ));
}

#[tokio::test]
async fn test_invoice_of_unknown_order_is_not_found() {
    let h = TestHarness::new().await;
    let result = h.registry.get_invoice(OrderId::new()).await;
    assert!(matches!(result, Err(SagaError::NotFound(_))));
}

#[tokio::test]
async fn test_concurrent_purchases_are_correlated() {
    let h = Arc::new(TestHarness::new().await);

    let mut handles = Vec::new();
    for i in 1..=20 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            let price = f64::from(i);
            let order = h
                .buy(&format!("user-{i}"), vec![ProductRef::new("p", "Item", price)])
                .await
                .unwrap();
            (order, price)
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let (order, price) = handle.await.unwrap();
        assert_eq!(order.total_price(), Some(price));
        assert_eq!(order.user(), Some(order.username.as_str()));
        assert!(ids.insert(order.order_id));
    }
    assert_eq!(h.store.order_count().await, 20);
}

#[tokio::test]
async fn test_interleaved_completions_reach_their_own_callers() {
    let h = TestHarness::storefront_only().await;
    let a = h
        .publisher
        .submit_order("alice", vec![ProductRef::new("a", "A", 1.0)])
        .await
        .unwrap();
    let b = h
        .publisher
        .submit_order("bob", vec![ProductRef::new("b", "B", 2.0)])
        .await
        .unwrap();

    for (id, user, total) in [(b, "bob", 2.0), (a, "alice", 1.0)] {
        let event = OrderCompletion::new(id, user, vec![], total);
        h.broker
            .inject("products", serde_json::to_vec(&event).unwrap());
    }

    let order_a = h.registry.await_completion(a, WAIT).await.unwrap();
    let order_b = h.registry.await_completion(b, WAIT).await.unwrap();
    assert_eq!(order_a.total_price(), Some(1.0));
    assert_eq!(order_a.user(), Some("alice"));
    assert_eq!(order_b.total_price(), Some(2.0));
    assert_eq!(order_b.user(), Some("bob"));
}

#[tokio::test]
async fn test_orphan_completion_is_acknowledged() {
    let h = TestHarness::new().await;
    let order = h.buy("alice", pen_and_pad()).await.unwrap();

    let orphan = OrderCompletion::new(OrderId::new(), "mallory", vec![], 1.0);
    h.broker
        .inject("products", serde_json::to_vec(&orphan).unwrap());
    h.broker.inject("products", b"{not json".to_vec());

    // a further purchase proves the consumer survived both messages
    let next = h.buy("alice", pen_and_pad()).await.unwrap();
    assert_eq!(next.status, OrderStatus::Completed);

    assert_eq!(h.broker.queue_len("products"), 0);
    assert_eq!(h.registry.len().await, 2);
    assert_eq!(
        h.registry.get_status(order.order_id).await.unwrap().total_price(),
        Some(25.0)
    );
}

#[tokio::test]
async fn test_wait_is_bounded_when_nothing_answers() {
    let h = TestHarness::storefront_only().await;
    let order_id = h.publisher.submit_order("alice", pen_and_pad()).await.unwrap();

    let started = std::time::Instant::now();
    let result = h
        .registry
        .await_completion(order_id, Duration::from_millis(100))
        .await;

    assert!(matches!(result, Err(SagaError::Timeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        h.registry.get_status(order_id).await.unwrap().status,
        OrderStatus::Failed
    );
}

#[tokio::test]
async fn test_late_completion_does_not_revive_timed_out_order() {
    let mut h = TestHarness::storefront_only().await;
    let order_id = h.publisher.submit_order("alice", pen_and_pad()).await.unwrap();
    let result = h
        .registry
        .await_completion(order_id, Duration::from_millis(20))
        .await;
    assert!(matches!(result, Err(SagaError::Timeout { .. })));

    // fulfillment comes up late and processes the queued request
    h.start_fulfillment().await;
    let next = h.buy("bob", pen_and_pad()).await.unwrap();
    assert_eq!(next.status, OrderStatus::Completed);

    assert_eq!(h.store.order_count().await, 2);
    assert_eq!(
        h.registry.get_status(order_id).await.unwrap().status,
        OrderStatus::Failed
    );
    assert!(matches!(
        h.registry.get_invoice(order_id).await,
        Err(SagaError::NotReady {
            status: OrderStatus::Failed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_store_outage_is_ridden_out_by_redelivery() {
    let h = TestHarness::new().await;
    h.store.set_unavailable(true);

    let order_id = h.publisher.submit_order("alice", pen_and_pad()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        h.registry.get_status(order_id).await.unwrap().status,
        OrderStatus::Pending
    );

    h.store.set_unavailable(false);
    let order = h.registry.await_completion(order_id, WAIT).await.unwrap();

    assert_eq!(order.total_price(), Some(25.0));
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test]
async fn test_duplicate_request_delivery_persists_once() {
    let h = TestHarness::new().await;
    let order = h.buy("alice", pen_and_pad()).await.unwrap();

    let replay = OrderRequest::new(order.order_id, "alice", pen_and_pad());
    h.broker
        .inject("orders", serde_json::to_vec(&replay).unwrap());

    // drain the re-announcement through a fresh purchase
    h.buy("bob", pen_and_pad()).await.unwrap();

    assert_eq!(h.store.order_count().await, 2);
    assert_eq!(
        h.registry.get_status(order.order_id).await.unwrap().total_price(),
        Some(25.0)
    );
}

#[tokio::test]
async fn test_saga_resumes_after_connection_drop() {
    let h = TestHarness::new().await;
    h.buy("alice", pen_and_pad()).await.unwrap();

    h.broker.drop_connections();
    assert!(!h.storefront.is_ready());
    let result = h.publisher.submit_order("alice", pen_and_pad()).await;
    assert!(matches!(result, Err(SagaError::PublishUnavailable { .. })));

    tokio::time::timeout(WAIT, async {
        while !h.storefront.is_ready() || h.broker.connection_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let order = h.buy("alice", pen_and_pad()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_saga_resumes_after_broker_restart() {
    let h = TestHarness::new().await;

    h.broker.restart();
    tokio::time::timeout(WAIT, async {
        while !h.storefront.is_ready() || h.broker.connection_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let order = h.buy("alice", pen_and_pad()).await.unwrap();
    assert_eq!(order.total_price(), Some(25.0));
}
