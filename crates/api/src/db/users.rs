//! Seller profile repository.
//!
//! Profiles are not credentials: they are refreshed from verified token
//! claims so listings can show who is selling.

use sqlx::PgPool;

use bookbazaar_core::{Seller, UserId};

use super::RepositoryError;

/// Repository for seller profiles.
pub struct UserRepository<'a> {
    pool: &'a PgPool,
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: UserId,
    name: String,
    email: String,
}

impl From<ProfileRow> for Seller {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
        }
    }
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a profile.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn upsert_profile(
        &self,
        id: UserId,
        name: &str,
        email: &str,
    ) -> Result<Seller, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r"
            INSERT INTO users (id, name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name,
                    email = EXCLUDED.email,
                    updated_at = now()
            RETURNING id, name, email
            ",
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .fetch_one(self.pool)
        .await?;

        Ok(row.into())
    }

    /// Get a profile by user id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, id: UserId) -> Result<Option<Seller>, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT id, name, email FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(Seller::from))
    }
}
