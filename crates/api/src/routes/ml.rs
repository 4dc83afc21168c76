//! ML proxy routes. All are rate limited per client address.
//!
//! ```text
//! POST /api/ml/predict-genre  - {summary} -> {predicted_genre}
//! POST /api/ml/extract-tags   - {bookId} -> {tags, cached}
//! GET  /api/ml/autocomplete   - ?query= (or ?q=) -> {suggestions}
//! ```

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use bookbazaar_core::{BookId, DEFAULT_GENRE};

use crate::db::BookRepository;
use crate::error::{AppError, Result};
use crate::middleware::ml_rate_limit;
use crate::routes::parse_body;
use crate::services::ml::{FALLBACK_TAGS, TagError, autocomplete_suggestions, tags_for_book};
use crate::state::AppState;

const RATE_LIMIT_HIT: &str = "ML rate limit hit";

/// Build the ML router, wrapped in the rate limiter held by `state`.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/ml/predict-genre", post(predict_genre))
        .route("/api/ml/extract-tags", post(extract_tags))
        .route("/api/ml/autocomplete", get(autocomplete))
        .layer(middleware::from_fn_with_state(
            state.ml_rate_limiter().clone(),
            ml_rate_limit,
        ))
}

#[derive(Debug, Default, Deserialize)]
struct PredictRequest {
    #[serde(default)]
    summary: Option<String>,
}

/// Predict genres for a summary.
///
/// When the service keeps rate limiting, answers 200 with the default genre
/// and `rateLimited: true`.
#[instrument(skip_all)]
async fn predict_genre(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let request: PredictRequest = parse_body(payload, "Summary is required")?;
    let summary = request
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("Summary is required".to_string()))?;

    match state.ml().predict_genre(summary).await {
        Ok(genres) => Ok(Json(json!({ "predicted_genre": genres }))),
        Err(e) if e.is_rate_limited() => {
            tracing::warn!("Genre prediction rate limited after retries, using default genre");
            Ok(Json(json!({
                "predicted_genre": [DEFAULT_GENRE],
                "error": RATE_LIMIT_HIT,
                "rateLimited": true,
            })))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractTagsRequest {
    #[serde(default)]
    book_id: Option<String>,
}

/// Tags for a listing, extracted once and then served from the listing.
#[instrument(skip_all)]
async fn extract_tags(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let request: ExtractTagsRequest = parse_body(payload, "bookId is required")?;
    let raw = request
        .book_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("bookId is required".to_string()))?;
    let book_id = BookId::parse(raw)?;

    let books = BookRepository::new(state.pool());
    match tags_for_book(&books, state.ml(), book_id).await {
        Ok(result) => Ok(Json(result).into_response()),
        Err(TagError::NotFound) => Err(AppError::NotFound("Book not found".to_string())),
        Err(TagError::Store(e)) => Err(e.into()),
        Err(TagError::Ml(e)) if e.is_rate_limited() => {
            tracing::warn!(%book_id, "Tag extraction rate limited, returning fallback tags");
            Ok((
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": RATE_LIMIT_HIT, "tags": FALLBACK_TAGS })),
            )
                .into_response())
        }
        Err(TagError::Ml(e)) => Err(e.into()),
    }
}

#[derive(Debug, Default, Deserialize)]
struct AutocompleteQuery {
    #[serde(default, alias = "q")]
    query: Option<String>,
}

/// Fixed-suffix suggestions for a query.
#[instrument(skip_all)]
async fn autocomplete(Query(params): Query<AutocompleteQuery>) -> Result<Json<Value>> {
    let query = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::Validation("Query parameter required".to_string()))?;

    Ok(Json(json!({ "suggestions": autocomplete_suggestions(query) })))
}
