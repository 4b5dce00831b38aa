//! Correlation registry between HTTP callers and completion events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::{OrderCompletion, OrderId, ProductRef};
use serde::Serialize;
use tokio::sync::{RwLock, watch};

use crate::error::{Result, SagaError};
use crate::state::OrderStatus;

/// An order awaiting, or holding, its completion event.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub username: String,
    /// Products as requested. Completion events never overwrite these.
    pub products: Vec<ProductRef>,
    pub result: Option<OrderCompletion>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PendingOrder {
    pub fn new(order_id: OrderId, username: impl Into<String>, products: Vec<ProductRef>) -> Self {
        Self {
            order_id,
            status: OrderStatus::Pending,
            username: username.into(),
            products,
            result: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Total computed by the fulfillment service, once completed.
    pub fn total_price(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.total_price)
    }

    /// Buyer identity as recorded by the fulfillment service, once completed.
    pub fn user(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.user.as_str())
    }

    fn complete(&mut self, event: OrderCompletion) {
        self.status = OrderStatus::Completed;
        self.result = Some(event);
        self.finished_at = Some(Utc::now());
    }

    fn fail(&mut self) {
        self.status = OrderStatus::Failed;
        self.finished_at = Some(Utc::now());
    }
}

/// Display line of an invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceLine {
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&ProductRef> for InvoiceLine {
    fn from(product: &ProductRef) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            price: product.price,
            description: product.description.clone(),
        }
    }
}

/// Invoice view of a completed order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub order_id: OrderId,
    /// Buyer as submitted with the request.
    pub username: String,
    /// Buyer as recorded by the fulfillment service.
    pub user: String,
    pub products: Vec<InvoiceLine>,
    pub total_price: f64,
    /// When the storefront applied the completion event. Completion events
    /// carry no timestamp, so this is not the persisted order's creation
    /// time; falls back to registration time.
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
}

/// Result of applying a completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The entry moved from pending to completed.
    Completed,
    /// No entry exists for the order id.
    Orphan,
    /// The entry had already reached a terminal state; the event was ignored.
    AlreadyFinished(OrderStatus),
}

type Slot = Arc<watch::Sender<PendingOrder>>;

/// In-memory map from order id to saga state.
///
/// The outer map is locked only to insert, look up or remove a slot. Each
/// entry lives in its own `watch` slot, which serialises writers to that
/// entry and wakes its waiters, so unrelated orders never contend on a
/// shared lock while being updated or awaited.
#[derive(Default)]
pub struct PendingOrderRegistry {
    entries: RwLock<HashMap<OrderId, Slot>>,
}

impl PendingOrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, order_id: OrderId) -> Option<Slot> {
        self.entries.read().await.get(&order_id).cloned()
    }

    /// Inserts a new pending entry. Fails if the order id is already known.
    pub async fn register(&self, entry: PendingOrder) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.order_id) {
            return Err(SagaError::DuplicateOrder(entry.order_id));
        }
        let (slot, _) = watch::channel(entry.clone());
        entries.insert(entry.order_id, Arc::new(slot));
        Ok(())
    }

    /// Applies a completion event to its pending entry.
    ///
    /// The entry keeps its requested products; the event becomes its result.
    /// Events for unknown or already finished orders are ignored.
    pub async fn complete(&self, event: OrderCompletion) -> CompletionOutcome {
        let Some(slot) = self.slot(event.order_id).await else {
            return CompletionOutcome::Orphan;
        };

        let mut outcome = CompletionOutcome::Completed;
        slot.send_if_modified(|entry| {
            if entry.status.can_complete() {
                entry.complete(event);
                true
            } else {
                outcome = CompletionOutcome::AlreadyFinished(entry.status);
                false
            }
        });
        outcome
    }

    /// Marks a pending entry as failed. Returns false if the entry was
    /// unknown or already finished.
    pub async fn fail(&self, order_id: OrderId) -> bool {
        let Some(slot) = self.slot(order_id).await else {
            return false;
        };
        slot.send_if_modified(|entry| {
            if entry.status.can_complete() {
                entry.fail();
                true
            } else {
                false
            }
        })
    }

    /// Suspends until the entry finishes or `timeout` elapses.
    ///
    /// On timeout the entry is marked failed, so a completion arriving
    /// afterwards is dropped instead of reviving an answered request. A
    /// completion that lands between the deadline and that transition wins.
    pub async fn await_completion(
        &self,
        order_id: OrderId,
        timeout: Duration,
    ) -> Result<PendingOrder> {
        let slot = self
            .slot(order_id)
            .await
            .ok_or(SagaError::NotFound(order_id))?;
        let mut rx = slot.subscribe();
        let started = std::time::Instant::now();

        let finished = match tokio::time::timeout(
            timeout,
            rx.wait_for(|entry| entry.status.is_terminal()),
        )
        .await
        {
            Ok(Ok(entry)) => Some(entry.clone()),
            Ok(Err(_)) => return Err(SagaError::NotFound(order_id)),
            Err(_) => None,
        };
        metrics::histogram!("order_wait_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let entry = match finished {
            Some(entry) => entry,
            None => {
                let mut raced = None;
                slot.send_if_modified(|entry| {
                    if entry.status.can_complete() {
                        entry.fail();
                        true
                    } else {
                        raced = Some(entry.clone());
                        false
                    }
                });
                match raced {
                    Some(entry) => entry,
                    None => {
                        metrics::counter!("orders_timed_out_total").increment(1);
                        tracing::warn!(%order_id, ?timeout, "order wait timed out");
                        return Err(SagaError::Timeout {
                            order_id,
                            waited: timeout,
                        });
                    }
                }
            }
        };

        match entry.status {
            OrderStatus::Completed => Ok(entry),
            _ => Err(SagaError::OrderFailed(order_id)),
        }
    }

    /// Returns a snapshot of the entry.
    pub async fn get_status(&self, order_id: OrderId) -> Result<PendingOrder> {
        let slot = self
            .slot(order_id)
            .await
            .ok_or(SagaError::NotFound(order_id))?;
        let entry = slot.borrow().clone();
        Ok(entry)
    }

    /// Builds the invoice of a completed order.
    pub async fn get_invoice(&self, order_id: OrderId) -> Result<Invoice> {
        let entry = self.get_status(order_id).await?;
        let Some(result) = entry.result.as_ref().filter(|_| entry.status == OrderStatus::Completed)
        else {
            return Err(SagaError::NotReady {
                order_id,
                status: entry.status,
            });
        };

        Ok(Invoice {
            order_id,
            username: entry.username.clone(),
            user: result.user.clone(),
            products: entry.products.iter().map(InvoiceLine::from).collect(),
            total_price: result.total_price,
            created_at: entry.finished_at.unwrap_or(entry.created_at),
            status: entry.status,
        })
    }

    /// Removes an entry. Returns true if it existed.
    pub async fn evict(&self, order_id: OrderId) -> bool {
        self.entries.write().await.remove(&order_id).is_some()
    }

    /// Removes finished entries whose terminal transition is older than
    /// `age`. Returns the number removed.
    pub async fn evict_finished_older_than(&self, age: Duration) -> usize {
        let age = TimeDelta::from_std(age).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now().checked_sub_signed(age);

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, slot| {
            let entry = slot.borrow();
            match (entry.finished_at, cutoff) {
                (Some(finished_at), Some(cutoff)) => finished_at > cutoff,
                _ => true,
            }
        });
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
