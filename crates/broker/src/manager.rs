//! Broker connection lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{
    BrokerConfig, BrokerError, Result,
    transport::{Channel, Transport},
};

/// A channel together with the connection generation it belongs to.
///
/// Generations increase with every successful connect, letting consumers
/// tell a fresh channel from the one whose stream just ended.
#[derive(Clone)]
pub struct ChannelHandle {
    pub generation: u64,
    pub channel: Arc<dyn Channel>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Owns the single broker connection and channel of a service.
///
/// Publishers and consumers borrow channel handles from the manager and
/// never hold on to them across a reconnect: while the connection is down,
/// [`channel`](Self::channel) and [`publish`](Self::publish) fail fast with
/// [`BrokerError::Unavailable`].
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: BrokerConfig,
    current: watch::Sender<Option<ChannelHandle>>,
    generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: BrokerConfig) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            transport,
            config,
            current,
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Returns true while a usable channel is available.
    pub fn is_ready(&self) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(|handle| handle.channel.is_open())
    }

    /// Returns the current channel, or `Unavailable` while disconnected.
    pub fn channel(&self) -> Result<Arc<dyn Channel>> {
        self.current
            .borrow()
            .as_ref()
            .filter(|handle| handle.channel.is_open())
            .map(|handle| handle.channel.clone())
            .ok_or_else(|| BrokerError::Unavailable("not connected".to_string()))
    }

    /// Waits until a usable channel from a generation newer than `after` is
    /// available.
    pub async fn wait_for_channel(&self, after: Option<u64>) -> Result<ChannelHandle> {
        let mut rx = self.current.subscribe();
        loop {
            let ready = rx
                .borrow_and_update()
                .as_ref()
                .filter(|h| after.is_none_or(|g| h.generation > g) && h.channel.is_open())
                .cloned();
            if let Some(handle) = ready {
                return Ok(handle);
            }
            if rx.changed().await.is_err() {
                return Err(BrokerError::Unavailable(
                    "connection manager shut down".to_string(),
                ));
            }
        }
    }

    /// Serializes `message` as JSON and publishes it to `queue` on the
    /// current channel. Never waits for a reconnect and never retries.
    pub async fn publish<T: Serialize + Sync>(&self, queue: &str, message: &T) -> Result<()> {
        let channel = self.channel()?;
        let payload = serde_json::to_vec(message)?;
        channel.publish(queue, &payload).await
    }

    /// Makes a single connection attempt: opens a channel, declares the
    /// queue topology on it and publishes it as the current channel.
    #[tracing::instrument(skip(self), fields(endpoint = %self.transport.endpoint()))]
    pub async fn connect(&self) -> Result<ChannelHandle> {
        let channel = self.transport.connect().await?;
        for queue in self.config.queues() {
            channel.declare_queue(queue).await?;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = ChannelHandle {
            generation,
            channel,
        };
        self.current.send_replace(Some(handle.clone()));

        tracing::info!(generation, "connected to broker");
        Ok(handle)
    }

    fn mark_disconnected(&self, generation: u64) {
        self.current.send_if_modified(|current| {
            if current.as_ref().is_some_and(|h| h.generation == generation) {
                *current = None;
                true
            } else {
                false
            }
        });
    }

    /// Keeps the service connected for as long as the task runs.
    ///
    /// Failed attempts are retried on the `initial` schedule (attempt
    /// counter reset after every successful connect); a dropped connection
    /// is followed by the fixed `after_disconnect` pause.
    pub async fn run(self: Arc<Self>) {
        let startup_delay = self.config.startup_delay;
        if !startup_delay.is_zero() {
            tracing::info!(
                delay_ms = startup_delay.as_millis() as u64,
                "delaying first broker connection"
            );
            tokio::time::sleep(startup_delay).await;
        }

        let mut attempt: u32 = 1;
        loop {
            match self.connect().await {
                Ok(handle) => {
                    attempt = 1;
                    handle.channel.closed().await;
                    self.mark_disconnected(handle.generation);

                    let delay = self.config.reconnect.after_disconnect.delay_for(1);
                    metrics::counter!("broker_reconnects_total").increment(1);
                    tracing::warn!(
                        retry_in_ms = delay.as_millis() as u64,
                        "broker connection closed, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let delay = self.config.reconnect.initial.delay_for(attempt);
                    tracing::error!(
                        attempt,
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "failed to connect to broker"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }
}
