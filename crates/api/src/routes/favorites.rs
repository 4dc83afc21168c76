//! Favorites routes.
//!
//! ```text
//! POST   /api/favorites           - add {bookId} (auth)
//! DELETE /api/favorites/{bookId}  - remove (auth)
//! GET    /api/favorites           - {favorites: [Book | null]} (auth)
//! ```

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::{delete, get},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use bookbazaar_core::BookId;

use crate::db::FavoriteRepository;
use crate::error::{AppError, Result};
use crate::middleware::RequireAuth;
use crate::routes::parse_body;
use crate::state::AppState;

const INVALID_ADD: &str = "Invalid or missing bookId";
const INVALID_REMOVE: &str = "Invalid bookId for removal";

/// Build the favorites router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/favorites", get(list).post(add))
        .route("/api/favorites/{book_id}", delete(remove))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteRequest {
    #[serde(default)]
    book_id: Option<String>,
}

fn parse_book_id(raw: Option<&str>, message: &str) -> Result<BookId> {
    raw.and_then(|id| BookId::parse(id).ok())
        .ok_or_else(|| AppError::Validation(message.to_string()))
}

/// Add a favorite. Adding twice is a no-op.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn add(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let request: FavoriteRequest = parse_body(payload, INVALID_ADD)?;
    let book_id = parse_book_id(request.book_id.as_deref(), INVALID_ADD)?;

    let inserted = FavoriteRepository::new(state.pool())
        .add(user.id, book_id)
        .await?;
    tracing::debug!(%book_id, inserted, "Favorite added");

    Ok(Json(json!({ "message": "Added to favorites" })))
}

/// Remove a favorite. Removing an absent favorite succeeds.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn remove(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(book_id): Path<String>,
) -> Result<Json<Value>> {
    let book_id = parse_book_id(Some(&book_id), INVALID_REMOVE)?;

    let removed = FavoriteRepository::new(state.pool())
        .remove(user.id, book_id)
        .await?;
    tracing::debug!(%book_id, removed, "Favorite removed");

    Ok(Json(json!({ "message": "Removed from favorites" })))
}

/// The caller's favorites; entries whose listing is gone are `null`.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn list(State(state): State<AppState>, RequireAuth(user): RequireAuth) -> Result<Json<Value>> {
    let favorites = FavoriteRepository::new(state.pool()).list(user.id).await?;
    Ok(Json(json!({ "favorites": favorites })))
}
