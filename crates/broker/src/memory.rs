use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    BrokerError, Result,
    transport::{Acknowledger, Channel, Delivery, DeliveryStream, Transport},
};

struct Unacked {
    connection: u64,
    queue: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    open_connections: HashSet<u64>,
    unacked: HashMap<u64, Unacked>,
    next_connection: u64,
    next_tag: u64,
    failing_connects: u32,
    connect_attempts: u32,
}

impl BrokerState {
    /// Drops `connection`, returning its unacknowledged deliveries to the
    /// head of their queues in original order.
    fn drop_connection(&mut self, connection: u64) {
        self.open_connections.remove(&connection);

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.connection == connection)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        for tag in tags.into_iter().rev() {
            if let Some(unacked) = self.unacked.remove(&tag)
                && let Some(queue) = self.queues.get_mut(&unacked.queue)
            {
                queue.push_front(unacked.payload);
            }
        }
    }
}

enum Next {
    Message(Delivery),
    Empty,
    Closed,
}

/// Process-local broker with at-least-once delivery.
///
/// Queues are plain FIFOs. A delivery stays owned by its connection until it
/// is settled; when the connection drops, every unsettled delivery goes back
/// to the head of its queue. Fault injection hooks simulate failed connects,
/// dropped connections and broker restarts.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    activity: Arc<watch::Sender<u64>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        let (activity, _) = watch::channel(0);
        Self {
            state: Arc::default(),
            activity: Arc::new(activity),
        }
    }
}

impl InMemoryBroker {
    /// Creates an empty broker with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) {
        self.activity.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Makes the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().failing_connects = n;
    }

    /// Total connection attempts seen, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Number of currently open connections.
    pub fn connection_count(&self) -> usize {
        self.lock().open_connections.len()
    }

    /// Drops every open connection. Queues and their messages survive;
    /// unsettled deliveries are requeued.
    pub fn drop_connections(&self) {
        {
            let mut state = self.lock();
            let connections: Vec<u64> = state.open_connections.iter().copied().collect();
            for connection in connections {
                state.drop_connection(connection);
            }
        }
        self.bump();
    }

    /// Simulates a broker restart: drops every connection and forgets all
    /// queues along with their messages.
    pub fn restart(&self) {
        {
            let mut state = self.lock();
            state.open_connections.clear();
            state.unacked.clear();
            state.queues.clear();
        }
        self.bump();
    }

    /// Returns true if `queue` is currently declared.
    pub fn is_declared(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    /// Number of ready (undelivered) messages on `queue`.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Number of delivered but unsettled messages across all queues.
    pub fn unacked_count(&self) -> usize {
        self.lock().unacked.len()
    }

    /// Enqueues a raw payload without going through a connection,
    /// declaring the queue if needed.
    pub fn inject(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.into());
        self.bump();
    }

    /// Removes and returns every ready message on `queue`.
    pub fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    fn is_open(&self, connection: u64) -> bool {
        self.lock().open_connections.contains(&connection)
    }

    fn next_delivery(&self, connection: u64, queue: &str) -> Next {
        let mut state = self.lock();
        if !state.open_connections.contains(&connection) {
            return Next::Closed;
        }
        let Some(payload) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Next::Empty;
        };

        state.next_tag += 1;
        let tag = state.next_tag;
        state.unacked.insert(
            tag,
            Unacked {
                connection,
                queue: queue.to_string(),
                payload: payload.clone(),
            },
        );

        Next::Message(Delivery::new(
            payload,
            MemoryAcker {
                broker: self.clone(),
                tag,
            },
        ))
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Channel>> {
        let connection = {
            let mut state = self.lock();
            state.connect_attempts += 1;
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(BrokerError::Unavailable("connection refused".to_string()));
            }
            state.next_connection += 1;
            let connection = state.next_connection;
            state.open_connections.insert(connection);
            connection
        };

        Ok(Arc::new(MemoryChannel {
            broker: self.clone(),
            connection,
        }))
    }

    fn endpoint(&self) -> String {
        "memory://".to_string()
    }
}

struct MemoryChannel {
    broker: InMemoryBroker,
    connection: u64,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.broker.is_open(self.connection) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("connection closed".to_string()))
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.ensure_open()?;
        self.broker
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        {
            let mut state = self.broker.lock();
            let q = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
            q.push_back(payload.to_vec());
        }
        self.broker.bump();
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        self.ensure_open()?;
        if !self.broker.is_declared(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }

        let broker = self.broker.clone();
        let rx = broker.activity.subscribe();
        let connection = self.connection;
        let queue = queue.to_string();

        let stream = futures_util::stream::unfold((broker, rx), move |(broker, mut rx)| {
            let queue = queue.clone();
            async move {
                loop {
                    rx.borrow_and_update();
                    match broker.next_delivery(connection, &queue) {
                        Next::Message(delivery) => return Some((delivery, (broker, rx))),
                        Next::Closed => return None,
                        Next::Empty => {}
                    }
                    if rx.changed().await.is_err() {
                        return None;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn closed(&self) {
        let mut rx = self.broker.activity.subscribe();
        while self.broker.is_open(self.connection) {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn is_open(&self) -> bool {
        self.broker.is_open(self.connection)
    }
}

struct MemoryAcker {
    broker: InMemoryBroker,
    tag: u64,
}

impl MemoryAcker {
    fn settle(&self) -> Result<Unacked> {
        self.broker
            .lock()
            .unacked
            .remove(&self.tag)
            .ok_or_else(|| BrokerError::Unavailable("delivery channel closed".to_string()))
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle().map(|_| ())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        let unacked = self.settle()?;
        if requeue {
            if let Some(queue) = self.broker.lock().queues.get_mut(&unacked.queue) {
                queue.push_front(unacked.payload);
            }
            self.broker.bump();
        }
        Ok(())
    }
}
