//! Fulfillment side of the saga: persisting orders and announcing them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::{ConnectionManager, Delivery, MessageHandler, run_consumer};
use common::OrderRequest;
use order_store::{OrderStore, PersistedOrder, SaveOutcome};
use tokio::task::JoinHandle;

use crate::error::{Result, SagaError};

/// Consumes purchase requests from the orders queue, persists them and
/// publishes the completion event to the products queue.
pub struct FulfillmentConsumer<S: OrderStore> {
    manager: Arc<ConnectionManager>,
    store: S,
    redelivery_delay: Duration,
}

impl<S: OrderStore + 'static> FulfillmentConsumer<S> {
    pub fn new(manager: Arc<ConnectionManager>, store: S) -> Self {
        Self {
            manager,
            store,
            redelivery_delay: Duration::from_secs(1),
        }
    }

    /// Pause before handing a message back to the broker after a store
    /// failure.
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// Handles one purchase request.
    ///
    /// The total is computed once from the request. The delivery is
    /// acknowledged only after the order is persisted; on a store failure it
    /// is requeued instead. A redelivered request finds the order already
    /// stored and re-announces it unchanged. The completion event is
    /// published after the acknowledgement.
    #[tracing::instrument(skip_all)]
    pub async fn process(&self, delivery: &Delivery) -> Result<SaveOutcome> {
        let request: OrderRequest = match delivery.decode() {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(error = %err, "discarding undecodable order request");
                delivery.reject().await?;
                return Err(err.into());
            }
        };
        let order_id = request.order_id;

        let outcome = match self.store.save(PersistedOrder::from_request(&request)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(%order_id, error = %err, "failed to persist order, requeueing");
                tokio::time::sleep(self.redelivery_delay).await;
                delivery.requeue().await?;
                return Err(SagaError::StoreUnavailable(err));
            }
        };
        delivery.ack().await?;

        let order = outcome.order();
        if outcome.is_duplicate() {
            tracing::info!(%order_id, "order already persisted, re-announcing");
        } else {
            metrics::counter!("orders_fulfilled_total").increment(1);
            tracing::info!(%order_id, total_price = order.total_price, "order persisted");
        }

        let queue = &self.manager.config().products_queue;
        self.manager.publish(queue, &order.completion()).await?;
        Ok(outcome)
    }

    /// Spawns the consume loop on the orders queue.
    pub fn spawn(self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let queue = manager.config().orders_queue.clone();
        tokio::spawn(run_consumer(manager, queue, self))
    }
}

#[async_trait]
impl<S: OrderStore + 'static> MessageHandler for FulfillmentConsumer<S> {
    async fn handle(&self, delivery: &Delivery) {
        if let Err(err) = self.process(delivery).await {
            tracing::warn!(error = %err, "order request not fulfilled");
        }
    }
}
