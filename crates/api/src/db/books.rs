//! Book listing repository.
//!
//! Every read joins the seller's profile; a listing whose seller has no
//! profile row comes back with the bare seller id.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use bookbazaar_core::{Book, BookId, Condition, Pagination, Price, Seller, SellerRef, UserId};

use super::RepositoryError;
use crate::models::{ListingChanges, NewListing};

/// Columns selected for a [`BookRow`], with `b` = books and `u` = users.
const BOOK_COLUMNS: &str = r"
    b.id, b.index, b.title, b.author, b.summary, b.price, b.condition, b.genre,
    b.image, b.seller, b.tags, b.created_at, b.updated_at,
    u.name AS seller_name, u.email AS seller_email
";

/// Search filters, all optional and combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookFilter {
    /// Exact match against any element of the genre list.
    pub genre: Option<String>,
    pub condition: Option<Condition>,
    /// Inclusive lower price bound.
    pub min_price: Option<Price>,
    /// Inclusive upper price bound.
    pub max_price: Option<Price>,
    /// Case-insensitive substring of title, any author, or summary.
    pub search: Option<String>,
}

impl BookFilter {
    fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| format!("%{}%", escape_like(term)))
    }
}

/// Escape `LIKE` metacharacters so the term matches literally.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(sqlx::FromRow)]
struct BookRow {
    id: BookId,
    index: i64,
    title: String,
    author: Vec<String>,
    summary: String,
    price: Price,
    condition: Condition,
    genre: Vec<String>,
    image: Option<String>,
    seller: UserId,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    seller_name: Option<String>,
    seller_email: Option<String>,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        let seller = match (row.seller_name, row.seller_email) {
            (Some(name), Some(email)) => SellerRef::Profile(Seller {
                id: row.seller,
                name,
                email,
            }),
            _ => SellerRef::Id(row.seller),
        };

        Self {
            id: row.id,
            index: row.index,
            title: row.title,
            author: row.author,
            summary: row.summary,
            price: row.price,
            condition: row.condition,
            genre: row.genre,
            image: row.image,
            seller,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for book listings.
pub struct BookRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> BookRepository<'a> {
    /// Create a new book repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a listing owned by `seller`.
    ///
    /// The listing's `index` is drawn from `book_index_seq`, so concurrent
    /// inserts always receive distinct, increasing values.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn create(&self, listing: &NewListing, seller: UserId) -> Result<Book, RepositoryError> {
        let sql = format!(
            r"
            WITH b AS (
                INSERT INTO books (id, title, author, summary, price, condition, genre, image, seller)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING *
            )
            SELECT {BOOK_COLUMNS}
            FROM b LEFT JOIN users u ON u.id = b.seller
            "
        );

        let row = sqlx::query_as::<_, BookRow>(&sql)
            .bind(BookId::generate())
            .bind(&listing.title)
            .bind(&listing.author)
            .bind(&listing.summary)
            .bind(listing.price)
            .bind(listing.condition)
            .bind(&listing.genre)
            .bind(listing.image.as_deref())
            .bind(seller)
            .fetch_one(self.pool)
            .await?;

        Ok(row.into())
    }

    /// Get a listing by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, id: BookId) -> Result<Option<Book>, RepositoryError> {
        let sql = format!(
            "SELECT {BOOK_COLUMNS} FROM books b LEFT JOIN users u ON u.id = b.seller WHERE b.id = $1"
        );

        let row = sqlx::query_as::<_, BookRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(Book::from))
    }

    /// Get every listing whose id is in `ids`, ordered by index.
    ///
    /// Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_many(&self, ids: &[BookId]) -> Result<Vec<Book>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = ids.iter().map(BookId::as_uuid).collect();
        let sql = format!(
            r"
            SELECT {BOOK_COLUMNS}
            FROM books b LEFT JOIN users u ON u.id = b.seller
            WHERE b.id = ANY($1)
            ORDER BY b.index
            "
        );

        let rows = sqlx::query_as::<_, BookRow>(&sql)
            .bind(ids)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(Book::from).collect())
    }

    /// All listings owned by `seller`, ordered by index.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_by_seller(&self, seller: UserId) -> Result<Vec<Book>, RepositoryError> {
        let sql = format!(
            r"
            SELECT {BOOK_COLUMNS}
            FROM books b LEFT JOIN users u ON u.id = b.seller
            WHERE b.seller = $1
            ORDER BY b.index
            "
        );

        let rows = sqlx::query_as::<_, BookRow>(&sql)
            .bind(seller)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(Book::from).collect())
    }

    /// All listings whose genre list contains `genre`, ordered by index.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_by_genre(&self, genre: &str) -> Result<Vec<Book>, RepositoryError> {
        let sql = format!(
            r"
            SELECT {BOOK_COLUMNS}
            FROM books b LEFT JOIN users u ON u.id = b.seller
            WHERE $1 = ANY(b.genre)
            ORDER BY b.index
            "
        );

        let rows = sqlx::query_as::<_, BookRow>(&sql)
            .bind(genre)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(Book::from).collect())
    }

    /// One page of listings matching `filter`, plus the total match count.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails, or
    /// `RepositoryError::DataCorruption` if the count is negative.
    pub async fn search(
        &self,
        filter: &BookFilter,
        page: Pagination,
    ) -> Result<(Vec<Book>, u64), RepositoryError> {
        const WHERE: &str = r"
            ($1::text IS NULL OR $1 = ANY(b.genre))
            AND ($2::text IS NULL OR b.condition = $2)
            AND ($3::numeric IS NULL OR b.price >= $3)
            AND ($4::numeric IS NULL OR b.price <= $4)
            AND (
                $5::text IS NULL
                OR b.title ILIKE $5 ESCAPE '\'
                OR b.summary ILIKE $5 ESCAPE '\'
                OR EXISTS (SELECT 1 FROM unnest(b.author) AS a(name) WHERE a.name ILIKE $5 ESCAPE '\')
            )
        ";

        let genre = filter
            .genre
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty());
        let pattern = filter.search_pattern();

        let count_sql = format!("SELECT COUNT(*) FROM books b WHERE {WHERE}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(genre)
            .bind(filter.condition)
            .bind(filter.min_price)
            .bind(filter.max_price)
            .bind(pattern.as_deref())
            .fetch_one(self.pool)
            .await?;
        let total = u64::try_from(total)
            .map_err(|_| RepositoryError::DataCorruption(format!("negative row count {total}")))?;

        let page_sql = format!(
            r"
            SELECT {BOOK_COLUMNS}
            FROM books b LEFT JOIN users u ON u.id = b.seller
            WHERE {WHERE}
            ORDER BY b.index
            LIMIT $6 OFFSET $7
            "
        );
        let rows = sqlx::query_as::<_, BookRow>(&page_sql)
            .bind(genre)
            .bind(filter.condition)
            .bind(filter.min_price)
            .bind(filter.max_price)
            .bind(pattern.as_deref())
            .bind(i64::from(page.limit()))
            .bind(i64::try_from(page.skip()).unwrap_or(i64::MAX))
            .fetch_all(self.pool)
            .await?;

        Ok((rows.into_iter().map(Book::from).collect(), total))
    }

    /// Apply `changes` to a listing; `None` fields keep their stored value.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the listing does not exist, or
    /// `RepositoryError::Database` if the update fails.
    pub async fn update(&self, id: BookId, changes: &ListingChanges) -> Result<Book, RepositoryError> {
        let sql = format!(
            r"
            WITH b AS (
                UPDATE books SET
                    title = COALESCE($2, title),
                    author = COALESCE($3, author),
                    summary = COALESCE($4, summary),
                    price = COALESCE($5, price),
                    condition = COALESCE($6, condition),
                    genre = COALESCE($7, genre),
                    image = COALESCE($8, image),
                    updated_at = now()
                WHERE id = $1
                RETURNING *
            )
            SELECT {BOOK_COLUMNS}
            FROM b LEFT JOIN users u ON u.id = b.seller
            "
        );

        let row = sqlx::query_as::<_, BookRow>(&sql)
            .bind(id)
            .bind(changes.title.as_deref())
            .bind(changes.author.as_deref())
            .bind(changes.summary.as_deref())
            .bind(changes.price)
            .bind(changes.condition)
            .bind(changes.genre.as_deref())
            .bind(changes.image.as_deref())
            .fetch_optional(self.pool)
            .await?;

        row.map(Book::from).ok_or(RepositoryError::NotFound)
    }

    /// Delete a listing. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the delete fails.
    pub async fn delete(&self, id: BookId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Load a listing's summary and cached tags.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn summary_and_tags(
        &self,
        id: BookId,
    ) -> Result<Option<(String, Vec<String>)>, RepositoryError> {
        let row: Option<(String, Vec<String>)> =
            sqlx::query_as("SELECT summary, tags FROM books WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool)
                .await?;

        Ok(row)
    }

    /// Persist extracted tags onto a listing.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn set_tags(&self, id: BookId, tags: &[String]) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE books SET tags = $2 WHERE id = $1")
            .bind(id)
            .bind(tags)
            .execute(self.pool)
            .await?;

        Ok(())
    }
}
