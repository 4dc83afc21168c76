//! Contact relay route.
//!
//! ```text
//! POST /api/contact  - {sellerEmail, buyerName, buyerEmail, message}
//! ```

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::post,
};
use serde_json::{Value, json};
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::routes::parse_body;
use crate::services::email::{ContactMessage, ContactRequest};
use crate::state::AppState;

/// Build the contact router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/contact", post(send_message))
}

/// Relay a buyer's message to a seller by email.
#[instrument(skip_all)]
async fn send_message(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let request: ContactRequest = parse_body(payload, "All fields are required.")?;
    let contact =
        ContactMessage::try_from(request).map_err(|e| AppError::Validation(e.to_string()))?;

    let mailer = state.mailer().ok_or_else(|| {
        tracing::error!("Contact message dropped: mail is not configured");
        AppError::Upstream("Failed to send message".to_string())
    })?;
    mailer.send_contact(&contact).await?;

    Ok(Json(json!({ "message": "Message sent successfully!" })))
}
