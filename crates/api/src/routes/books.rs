//! Catalog routes.
//!
//! ```text
//! GET    /api/books/all          - filtered, paginated search
//! GET    /api/books/by-ids       - listings for a comma-separated id list
//! GET    /api/books/genre        - listings in one genre
//! GET    /api/books/my-books     - caller's own listings (auth)
//! POST   /api/books/add          - create a listing, multipart (auth)
//! GET    /api/books/{id}         - one listing
//! PUT    /api/books/{id}         - update own listing, multipart (auth)
//! DELETE /api/books/{id}         - delete own listing (auth)
//! ```

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use bookbazaar_core::{Book, BookId, Condition, PageSlice, Pagination, Price};

use crate::db::{BookFilter, BookRepository, RepositoryError, UserRepository};
use crate::error::{AppError, Result};
use crate::middleware::RequireAuth;
use crate::models::{CurrentUser, ListingForm};
use crate::state::AppState;

/// Largest accepted listing form, image included.
const MAX_LISTING_BYTES: usize = 10 * 1024 * 1024;

const BOOK_NOT_FOUND: &str = "Book not found";

/// Build the catalog router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/books/all", get(search))
        .route("/api/books/by-ids", get(by_ids))
        .route("/api/books/genre", get(by_genre))
        .route("/api/books/my-books", get(my_books))
        .route("/api/books/add", post(create))
        .route(
            "/api/books/{id}",
            get(get_book).put(update).delete(delete_book),
        )
        .layer(DefaultBodyLimit::max(MAX_LISTING_BYTES))
}

// =============================================================================
// Queries
// =============================================================================

/// Query string of `GET /api/books/all`.
///
/// Values arrive as text; unparseable page values fall back to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub genre: Option<String>,
    pub condition: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub search: Option<String>,
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl SearchQuery {
    fn pagination(&self) -> Pagination {
        let parse = |v: Option<&String>| non_blank(v).and_then(|s| s.parse::<u32>().ok());
        Pagination::new(parse(self.page.as_ref()), parse(self.limit.as_ref()))
    }

    fn filter(&self) -> Result<BookFilter> {
        let price = |v: Option<&String>| {
            non_blank(v)
                .map(str::parse::<Price>)
                .transpose()
                .map_err(|e| AppError::Validation(format!("Invalid price filter: {e}")))
        };

        Ok(BookFilter {
            genre: non_blank(self.genre.as_ref()).map(str::to_owned),
            condition: non_blank(self.condition.as_ref())
                .map(str::parse::<Condition>)
                .transpose()
                .map_err(|e| AppError::Validation(e.to_string()))?,
            min_price: price(self.min_price.as_ref())?,
            max_price: price(self.max_price.as_ref())?,
            search: non_blank(self.search.as_ref()).map(str::to_owned),
        })
    }
}

/// Search listings.
#[instrument(skip_all)]
async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<PageSlice<Book>>> {
    let filter = query.filter()?;
    let pagination = query.pagination();

    let (books, total) = BookRepository::new(state.pool())
        .search(&filter, pagination)
        .await?;

    Ok(Json(PageSlice::new(books, total, pagination)))
}

#[derive(Debug, Deserialize)]
pub struct IdsQuery {
    pub ids: Option<String>,
}

/// Parse a comma-separated id list, keeping only well-formed ids.
fn parse_id_list(csv: &str) -> Vec<BookId> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| BookId::parse(s).ok())
        .collect()
}

/// Listings for a set of ids. Unknown ids are dropped.
#[instrument(skip_all)]
async fn by_ids(
    State(state): State<AppState>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<Vec<Book>>> {
    let ids = query.ids.as_deref().map(parse_id_list).unwrap_or_default();
    if ids.is_empty() {
        return Err(AppError::Validation("Invalid or missing IDs".to_string()));
    }

    let books = BookRepository::new(state.pool()).get_many(&ids).await?;
    Ok(Json(books))
}

#[derive(Debug, Deserialize)]
pub struct GenreQuery {
    pub genre: Option<String>,
}

/// Listings whose genre list contains the given genre.
#[instrument(skip_all)]
async fn by_genre(
    State(state): State<AppState>,
    Query(query): Query<GenreQuery>,
) -> Result<impl IntoResponse> {
    let genre = non_blank(query.genre.as_ref())
        .ok_or_else(|| AppError::Validation("Genre is required".to_string()))?;

    let books = BookRepository::new(state.pool()).list_by_genre(genre).await?;
    Ok(Json(json!({ "books": books })))
}

/// The caller's own listings.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn my_books(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Vec<Book>>> {
    let books = BookRepository::new(state.pool())
        .list_by_seller(user.id)
        .await?;
    Ok(Json(books))
}

/// One listing by id.
#[instrument(skip_all, fields(book_id = %id))]
async fn get_book(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Book>> {
    let id = BookId::parse(&id)?;
    let book = BookRepository::new(state.pool())
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(BOOK_NOT_FOUND.to_string()))?;
    Ok(Json(book))
}

// =============================================================================
// Mutations
// =============================================================================

/// Read a multipart listing form, storing the `image` file part if present.
///
/// Returns the text fields and the stored image filename. A stored image is
/// removed again if the rest of the form cannot be read.
async fn read_listing_form(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(ListingForm, Option<String>)> {
    let mut form = ListingForm::default();
    let mut image = None;

    if let Err(e) = read_fields(state, &mut multipart, &mut form, &mut image).await {
        discard_upload(state, image.as_ref()).await;
        return Err(e);
    }

    Ok((form, image))
}

async fn read_fields(
    state: &AppState,
    multipart: &mut Multipart,
    form: &mut ListingForm,
    image: &mut Option<String>,
) -> Result<()> {
    let bad_form = |e: axum::extract::multipart::MultipartError| {
        AppError::Validation(format!("Invalid form data: {e}"))
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        match field.file_name().map(str::to_owned) {
            Some(file_name) if name == "image" => {
                let bytes = field.bytes().await.map_err(bad_form)?;
                if bytes.is_empty() {
                    continue;
                }
                if let Some(previous) = image.take() {
                    state.images().remove(&previous).await;
                }
                *image = Some(state.images().save(Some(&file_name), &bytes).await?);
            }
            Some(_) => {
                // Unexpected file parts are drained and ignored.
                field.bytes().await.map_err(bad_form)?;
            }
            None => {
                let value = field.text().await.map_err(bad_form)?;
                form.push(name, value);
            }
        }
    }

    Ok(())
}

/// Remove a freshly stored upload when the request fails afterwards.
async fn discard_upload(state: &AppState, image: Option<&String>) {
    if let Some(image) = image {
        state.images().remove(image).await;
    }
}

/// Await `write`, removing the upload stored for this request if it fails.
async fn or_discard<T>(
    state: &AppState,
    image: Option<&String>,
    write: impl Future<Output = Result<T>>,
) -> Result<T> {
    match write.await {
        Ok(value) => Ok(value),
        Err(e) => {
            discard_upload(state, image).await;
            Err(e)
        }
    }
}

async fn upsert_seller(state: &AppState, user: &CurrentUser) -> Result<()> {
    UserRepository::new(state.pool())
        .upsert_profile(user.id, &user.name, &user.email)
        .await?;
    Ok(())
}

/// Create a listing owned by the caller.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn create(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    multipart: Multipart,
) -> Result<impl IntoResponse> {
    let (form, image) = read_listing_form(&state, multipart).await?;

    let listing = match form.into_new_listing(image.clone()) {
        Ok(listing) => listing,
        Err(e) => {
            discard_upload(&state, image.as_ref()).await;
            return Err(e.into());
        }
    };

    let write = async {
        upsert_seller(&state, &user).await?;
        let book = BookRepository::new(state.pool())
            .create(&listing, user.id)
            .await?;
        Ok::<_, AppError>(book)
    };
    let book = or_discard(&state, image.as_ref(), write).await?;

    tracing::info!(book_id = %book.id, index = book.index, "Listing created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Book added successfully", "book": book })),
    ))
}

/// Load a listing and check the caller owns it.
async fn owned_book(state: &AppState, id: &str, user: &CurrentUser) -> Result<Book> {
    let id = BookId::parse(id)?;
    let book = BookRepository::new(state.pool())
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(BOOK_NOT_FOUND.to_string()))?;

    if !book.is_owned_by(user.id) {
        tracing::warn!(book_id = %book.id, user_id = %user.id, "Rejected change to another seller's listing");
        return Err(AppError::Forbidden("Unauthorized".to_string()));
    }

    Ok(book)
}

/// Update the caller's listing. Omitted fields keep their value.
#[instrument(skip_all, fields(user_id = %user.id, book_id = %id))]
async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RequireAuth(user): RequireAuth,
    multipart: Multipart,
) -> Result<impl IntoResponse> {
    let book = owned_book(&state, &id, &user).await?;
    let (form, image) = read_listing_form(&state, multipart).await?;

    let changes = match form.into_changes(image.clone()) {
        Ok(changes) => changes,
        Err(e) => {
            discard_upload(&state, image.as_ref()).await;
            return Err(e.into());
        }
    };

    let write = async {
        upsert_seller(&state, &user).await?;
        BookRepository::new(state.pool())
            .update(book.id, &changes)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => AppError::NotFound(BOOK_NOT_FOUND.to_string()),
                other => other.into(),
            })
    };
    let updated = or_discard(&state, image.as_ref(), write).await?;

    // The replaced image goes only once the listing no longer points at it.
    if let (Some(new), Some(old)) = (&updated.image, &book.image)
        && new != old
    {
        state.images().remove(old).await;
    }

    tracing::info!(book_id = %updated.id, "Listing updated");

    Ok(Json(json!({ "message": "Book updated", "book": updated })))
}

/// Delete the caller's listing and its stored image.
#[instrument(skip_all, fields(user_id = %user.id, book_id = %id))]
async fn delete_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RequireAuth(user): RequireAuth,
) -> Result<impl IntoResponse> {
    let book = owned_book(&state, &id, &user).await?;

    if !BookRepository::new(state.pool()).delete(book.id).await? {
        return Err(AppError::NotFound(BOOK_NOT_FOUND.to_string()));
    }
    if let Some(image) = &book.image {
        state.images().remove(image).await;
    }

    tracing::info!(book_id = %book.id, "Listing deleted");

    Ok(Json(json!({ "message": "Book deleted successfully" })))
}
