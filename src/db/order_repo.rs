//! PostgreSQL order repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::Row;
use tracing::Instrument;

use crate::db::repository::{OrderStore, StoreError, StoreResult};
use crate::db::DbPool;
use crate::models::{LineItem, Order, OrderStatus, StoredOrder};

const INSERT_ORDER: &str = r#"
    INSERT INTO orders (
        order_id, customer_id, customer_name, customer_email,
        items, total_amount, status, created_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    RETURNING processed_at
"#;

const SELECT_ORDER: &str = r#"
    SELECT order_id, customer_id, customer_name, customer_email,
           items, total_amount, status, created_at, processed_at
    FROM orders
    WHERE order_id = $1
"#;

/// PostgreSQL implementation of [`OrderStore`]
///
/// Plain `INSERT` without `ON CONFLICT`: a repeated `order_id` surfaces as a
/// unique violation, which is how redelivered messages are recognised.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: DbPool,
}

impl PgOrderRepository {
    /// Create a new PostgreSQL order repository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Convert a database row to a stored order
    fn row_to_stored_order(row: &sqlx::postgres::PgRow) -> StoreResult<StoredOrder> {
        let Json(items_value): Json<Value> = row.try_get("items")?;
        let items = match items_value {
            Value::Array(values) => values
                .iter()
                .enumerate()
                .map(|(index, value)| LineItem::from_value(value, index))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::other(format!("Stored items are invalid: {}", e)))?,
            other => {
                return Err(StoreError::other(format!(
                    "Stored items are not an array: {}",
                    other
                )))
            },
        };

        let status: String = row.try_get("status")?;
        let status = OrderStatus::parse(&status)
            .map_err(|e| StoreError::other(format!("Stored status is invalid: {}", e)))?;

        let total_amount: Decimal = row.try_get("total_amount")?;

        Ok(StoredOrder {
            order: Order {
                order_id: row.try_get("order_id")?,
                customer_id: row.try_get("customer_id")?,
                customer_name: row.try_get("customer_name")?,
                customer_email: row.try_get("customer_email")?,
                items,
                total_amount,
                status,
                created_at: row.try_get("created_at")?,
            },
            processed_at: row.try_get("processed_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PgOrderRepository {
    async fn insert_order(&self, order: &Order) -> StoreResult<StoredOrder> {
        let span = crate::db_span!("insert_order");

        async move {
            let mut tx = self.pool.begin().await?;

            let inserted = sqlx::query_scalar::<_, DateTime<Utc>>(INSERT_ORDER)
                .bind(&order.order_id)
                .bind(&order.customer_id)
                .bind(&order.customer_name)
                .bind(&order.customer_email)
                .bind(Json(&order.items))
                .bind(order.total_amount)
                .bind(order.status.as_str())
                .bind(order.created_at)
                .fetch_one(&mut *tx)
                .await;

            match inserted {
                Ok(processed_at) => {
                    tx.commit().await?;
                    tracing::Span::current().record("rows_affected", 1u64);
                    Ok(StoredOrder {
                        order: order.clone(),
                        processed_at,
                    })
                },
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(error = %rollback_err, "Rollback failed");
                    }
                    Err(StoreError::from(e))
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn find_by_id(&self, order_id: &str) -> StoreResult<Option<StoredOrder>> {
        let row = sqlx::query(SELECT_ORDER)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_stored_order).transpose()
    }

    async fn count(&self) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn health_check(&self) -> StoreResult<()> {
        crate::db::pool::health_check(&self.pool)
            .await
            .map_err(|e| StoreError::transient(format!("Health check failed: {}", e)))
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }
}
