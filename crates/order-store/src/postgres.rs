use async_trait::async_trait;
use common::ProductRef;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OrderId, OrderStoreError, PersistedOrder, Result,
    store::{OrderStore, SaveOutcome},
};

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<PersistedOrder> {
        let products_json: serde_json::Value = row.try_get("products")?;
        let products: Vec<ProductRef> = serde_json::from_value(products_json)?;

        Ok(PersistedOrder {
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            user: row.try_get("username")?,
            products,
            total_price: row.try_get("total_price")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn save(&self, order: PersistedOrder) -> Result<SaveOutcome> {
        let products = serde_json::to_value(&order.products)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (order_id, username, products, total_price, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order.order_id.as_uuid())
        .bind(&order.user)
        .bind(products)
        .bind(order.total_price)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(SaveOutcome::Inserted(order));
        }

        let existing = self.get(order.order_id).await?.ok_or_else(|| {
            OrderStoreError::Unavailable(format!(
                "order {} conflicted but could not be read back",
                order.order_id
            ))
        })?;
        tracing::debug!(order_id = %order.order_id, "order already persisted");
        Ok(SaveOutcome::Existing(existing))
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<PersistedOrder>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, username, products, total_price, created_at
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
