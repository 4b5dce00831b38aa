//! Storefront side of the saga: publishing purchase requests.

use std::sync::Arc;

use broker::ConnectionManager;
use common::{OrderId, OrderRequest, ProductRef};

use crate::error::{Result, SagaError};
use crate::registry::{PendingOrder, PendingOrderRegistry};

/// Publishes purchase requests and registers them for correlation.
pub struct OrderPublisher {
    manager: Arc<ConnectionManager>,
    registry: Arc<PendingOrderRegistry>,
}

impl OrderPublisher {
    pub fn new(manager: Arc<ConnectionManager>, registry: Arc<PendingOrderRegistry>) -> Self {
        Self { manager, registry }
    }

    /// Registers a pending entry under a fresh order id and publishes the
    /// purchase request to the orders queue.
    ///
    /// The publish is attempted once. If the broker is not ready, the entry
    /// is kept but marked failed and `PublishUnavailable` is returned, so
    /// the caller answers immediately instead of waiting.
    #[tracing::instrument(skip(self, products), fields(product_count = products.len()))]
    pub async fn submit_order(&self, username: &str, products: Vec<ProductRef>) -> Result<OrderId> {
        if username.trim().is_empty() {
            return Err(SagaError::Validation("username is required".to_string()));
        }
        if products.is_empty() {
            return Err(SagaError::Validation("order has no products".to_string()));
        }

        let order_id = OrderId::new();
        self.registry
            .register(PendingOrder::new(order_id, username, products.clone()))
            .await?;

        let request = OrderRequest::new(order_id, username, products);
        let queue = &self.manager.config().orders_queue;
        if let Err(err) = self.manager.publish(queue, &request).await {
            self.registry.fail(order_id).await;
            tracing::error!(%order_id, error = %err, "failed to publish order request");
            return Err(SagaError::PublishUnavailable {
                order_id,
                source: err,
            });
        }

        metrics::counter!("orders_submitted_total").increment(1);
        tracing::info!(%order_id, "order request published");
        Ok(order_id)
    }
}
