//! Long-running queue consumption on top of the connection manager.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::{
    ConnectionManager,
    manager::ChannelHandle,
    transport::{Delivery, DeliveryStream},
};

/// Processes deliveries from one queue.
///
/// The handler owns settlement: every delivery must be acknowledged,
/// requeued or rejected by it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery);
}

/// Consumes `queue` for as long as the task runs.
///
/// Deliveries are handled strictly one at a time. When the connection
/// drops the delivery stream ends; consumption resumes on the next channel
/// the manager establishes, never on the stale one.
pub async fn run_consumer<H: MessageHandler>(
    manager: Arc<ConnectionManager>,
    queue: String,
    handler: H,
) {
    let mut last_generation = None;
    loop {
        let handle = match manager.wait_for_channel(last_generation).await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(%queue, error = %err, "consumer stopped");
                return;
            }
        };
        last_generation = Some(handle.generation);

        let Some(mut deliveries) = subscribe(&manager, &handle, &queue).await else {
            continue;
        };
        tracing::info!(%queue, generation = handle.generation, "consuming");

        while let Some(delivery) = deliveries.next().await {
            handler.handle(&delivery).await;
        }
        tracing::warn!(%queue, "delivery stream ended, waiting for reconnect");
    }
}

/// Starts consuming `queue` on `handle`, retrying on the initial backoff
/// schedule while the channel stays open. Returns `None` once the channel
/// is closed, leaving recovery to the next generation.
async fn subscribe(
    manager: &ConnectionManager,
    handle: &ChannelHandle,
    queue: &str,
) -> Option<DeliveryStream> {
    let mut attempt: u32 = 1;
    loop {
        match handle.channel.consume(queue).await {
            Ok(deliveries) => return Some(deliveries),
            Err(err) if handle.channel.is_open() => {
                let delay = manager.config().reconnect.initial.delay_for(attempt);
                tracing::warn!(
                    %queue,
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "failed to start consuming"
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(err) => {
                tracing::warn!(%queue, error = %err, "channel closed before consuming");
                return None;
            }
        }
    }
}
