use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    OrderId, OrderStoreError, PersistedOrder, Result,
    store::{OrderStore, SaveOutcome},
};

/// In-memory order store.
///
/// Can be switched into an unavailable mode to exercise store outages.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, PersistedOrder>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OrderStoreError::Unavailable(
                "in-memory store offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn save(&self, order: PersistedOrder) -> Result<SaveOutcome> {
        self.check_available()?;

        let mut orders = self.orders.write().await;
        if let Some(existing) = orders.get(&order.order_id) {
            return Ok(SaveOutcome::Existing(existing.clone()));
        }
        orders.insert(order.order_id, order.clone());
        Ok(SaveOutcome::Inserted(order))
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<PersistedOrder>> {
        self.check_available()?;
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
