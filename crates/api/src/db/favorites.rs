//! Favorite (user, book) relations.
//!
//! There is no foreign key to `books`: a favorite can outlive its listing,
//! and then lists as `None`.

use std::collections::HashMap;

use sqlx::PgPool;

use bookbazaar_core::{Book, BookId, UserId};

use super::{BookRepository, RepositoryError};

/// Repository for user favorites.
pub struct FavoriteRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> FavoriteRepository<'a> {
    /// Create a new favorites repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Add a favorite. Returns `false` if it already existed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn add(&self, user: UserId, book: BookId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            INSERT INTO user_favorites (user_id, book_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, book_id) DO NOTHING
            ",
        )
        .bind(user)
        .bind(book)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a favorite. Returns `false` if there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the delete fails.
    pub async fn remove(&self, user: UserId, book: BookId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM user_favorites WHERE user_id = $1 AND book_id = $2")
            .bind(user)
            .bind(book)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The user's favorites, most recently added first.
    ///
    /// Each entry is the listing, or `None` when the listing was deleted.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn list(&self, user: UserId) -> Result<Vec<Option<Book>>, RepositoryError> {
        let ids: Vec<BookId> = sqlx::query_scalar(
            r"
            SELECT book_id FROM user_favorites
            WHERE user_id = $1
            ORDER BY created_at DESC, book_id
            ",
        )
        .bind(user)
        .fetch_all(self.pool)
        .await?;

        let mut books: HashMap<BookId, Book> = BookRepository::new(self.pool)
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|book| (book.id, book))
            .collect();

        Ok(ids.iter().map(|id| books.remove(id)).collect())
    }
}
