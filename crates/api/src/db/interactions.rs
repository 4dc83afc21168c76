//! Interaction counters: one row per (user, book, kind), incremented on repeat.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use bookbazaar_core::{BookId, Interaction, InteractionKind, UserId};

use super::RepositoryError;

#[derive(sqlx::FromRow)]
struct InteractionRow {
    user_id: UserId,
    book_id: BookId,
    kind: InteractionKind,
    count: i32,
    timestamp: DateTime<Utc>,
}

impl From<InteractionRow> for Interaction {
    fn from(row: InteractionRow) -> Self {
        Self {
            user_id: row.user_id,
            book_id: row.book_id,
            kind: row.kind,
            count: row.count,
            timestamp: row.timestamp,
        }
    }
}

/// Repository for user interactions.
pub struct InteractionRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> InteractionRepository<'a> {
    /// Create a new interactions repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Record one interaction: the first creates the counter at 1, each
    /// repeat increments it and refreshes the timestamp.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the upsert fails.
    pub async fn record(
        &self,
        user: UserId,
        book: BookId,
        kind: InteractionKind,
    ) -> Result<Interaction, RepositoryError> {
        let row = sqlx::query_as::<_, InteractionRow>(
            r"
            INSERT INTO user_interactions (user_id, book_id, kind)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, book_id, kind) DO UPDATE
                SET count = user_interactions.count + 1,
                    timestamp = now()
            RETURNING user_id, book_id, kind, count, timestamp
            ",
        )
        .bind(user)
        .bind(book)
        .bind(kind)
        .fetch_one(self.pool)
        .await?;

        Ok(row.into())
    }

    /// The user's interaction counters, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list(&self, user: UserId) -> Result<Vec<Interaction>, RepositoryError> {
        let rows = sqlx::query_as::<_, InteractionRow>(
            r"
            SELECT user_id, book_id, kind, count, timestamp
            FROM user_interactions
            WHERE user_id = $1
            ORDER BY timestamp DESC
            ",
        )
        .bind(user)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Interaction::from).collect())
    }
}
