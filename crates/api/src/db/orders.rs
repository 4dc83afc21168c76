//! Order repository. Orders are written once and never modified.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use bookbazaar_core::{Order, OrderId, OrderItem, Price, UserId};

use super::RepositoryError;

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    items: Json<Vec<OrderItem>>,
    total: Price,
    ordered_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: row.id,
            user: row.user_id,
            items: row.items.0,
            total: row.total,
            ordered_at: row.ordered_at,
        }
    }
}

/// Repository for orders.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Store an order exactly as submitted.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn create(
        &self,
        user: UserId,
        items: &[OrderItem],
        total: Price,
    ) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r"
            INSERT INTO orders (id, user_id, items, total)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, items, total, ordered_at
            ",
        )
        .bind(OrderId::generate())
        .bind(user)
        .bind(Json(items))
        .bind(total)
        .fetch_one(self.pool)
        .await?;

        Ok(row.into())
    }

    /// The user's orders, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_for_user(&self, user: UserId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, user_id, items, total, ordered_at
            FROM orders
            WHERE user_id = $1
            ORDER BY ordered_at DESC, id
            ",
        )
        .bind(user)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Order::from).collect())
    }
}
