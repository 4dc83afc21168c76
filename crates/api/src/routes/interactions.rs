//! Interaction tracking routes.
//!
//! ```text
//! POST /api/interactions  - record {bookId, type} (auth)
//! GET  /api/interactions  - caller's counters, newest first (auth)
//! ```

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::get,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use bookbazaar_core::{BookId, Interaction, InteractionKind};

use crate::db::InteractionRepository;
use crate::error::{AppError, Result};
use crate::middleware::RequireAuth;
use crate::routes::parse_body;
use crate::state::AppState;

const INVALID_INTERACTION: &str = "Invalid interaction data";

/// Build the interactions router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/interactions", get(list).post(record))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractionRequest {
    #[serde(default)]
    book_id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl InteractionRequest {
    fn parse(&self) -> Result<(BookId, InteractionKind)> {
        let book_id = self
            .book_id
            .as_deref()
            .and_then(|id| BookId::parse(id).ok())
            .ok_or_else(|| AppError::Validation(INVALID_INTERACTION.to_string()))?;
        let kind = self
            .kind
            .as_deref()
            .ok_or_else(|| AppError::Validation(INVALID_INTERACTION.to_string()))?
            .parse::<InteractionKind>()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        Ok((book_id, kind))
    }
}

/// Record one interaction, incrementing the caller's counter.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn record(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Interaction>> {
    let request: InteractionRequest = parse_body(payload, INVALID_INTERACTION)?;
    let (book_id, kind) = request.parse()?;

    let interaction = InteractionRepository::new(state.pool())
        .record(user.id, book_id, kind)
        .await?;
    Ok(Json(interaction))
}

/// The caller's interaction counters.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn list(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Vec<Interaction>>> {
    let interactions = InteractionRepository::new(state.pool()).list(user.id).await?;
    Ok(Json(interactions))
}
