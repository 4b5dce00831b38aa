//! Storefront side of the saga: applying completion events.

use std::sync::Arc;

use async_trait::async_trait;
use broker::{ConnectionManager, Delivery, MessageHandler, run_consumer};
use common::OrderCompletion;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::registry::{CompletionOutcome, PendingOrderRegistry};

/// Consumes completion events from the products queue and resolves the
/// matching pending entries.
#[derive(Clone)]
pub struct CompletionConsumer {
    registry: Arc<PendingOrderRegistry>,
}

impl CompletionConsumer {
    pub fn new(registry: Arc<PendingOrderRegistry>) -> Self {
        Self { registry }
    }

    /// Applies one delivery to the registry and settles it.
    ///
    /// The delivery is acknowledged only after the registry update, so a
    /// crash in between leads to redelivery. Events without a pending entry
    /// are acknowledged and dropped. Undecodable payloads are rejected.
    pub async fn process(&self, delivery: &Delivery) -> Result<CompletionOutcome> {
        let event: OrderCompletion = match delivery.decode() {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = %err, "discarding undecodable completion event");
                delivery.reject().await?;
                return Err(err.into());
            }
        };
        let order_id = event.order_id;

        let outcome = self.registry.complete(event).await;
        delivery.ack().await?;

        match outcome {
            CompletionOutcome::Completed => {
                metrics::counter!("orders_completed_total").increment(1);
                tracing::info!(%order_id, "order completed");
            }
            CompletionOutcome::Orphan => {
                metrics::counter!("orphan_completions_total").increment(1);
                tracing::debug!(%order_id, "no pending entry for completion event");
            }
            CompletionOutcome::AlreadyFinished(status) => {
                tracing::debug!(%order_id, %status, "completion event for finished order");
            }
        }
        Ok(outcome)
    }

    /// Spawns the consume loop on the products queue.
    pub fn spawn(self, manager: Arc<ConnectionManager>) -> JoinHandle<()> {
        let queue = manager.config().products_queue.clone();
        tokio::spawn(run_consumer(manager, queue, self))
    }
}

#[async_trait]
impl MessageHandler for CompletionConsumer {
    async fn handle(&self, delivery: &Delivery) {
        if let Err(err) = self.process(delivery).await {
            tracing::warn!(error = %err, "completion event not applied");
        }
    }
}
