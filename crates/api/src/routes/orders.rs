//! Order routes.
//!
//! ```text
//! POST /api/orders  - place an order (auth)
//! GET  /api/orders  - caller's orders, newest first (auth)
//! ```

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use bookbazaar_core::{Order, OrderItem, Price};

use crate::db::OrderRepository;
use crate::error::{AppError, Result};
use crate::middleware::RequireAuth;
use crate::routes::parse_body;
use crate::state::AppState;

const INVALID_ORDER: &str = "Invalid order data";

/// Build the orders router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/orders", get(list).post(place))
}

#[derive(Debug, Deserialize)]
struct PlaceOrderRequest {
    #[serde(default)]
    items: Vec<OrderItem>,
    #[serde(default)]
    total: Option<Price>,
}

/// Check an order body: at least one item and a positive total.
fn validate(request: PlaceOrderRequest) -> Result<(Vec<OrderItem>, Price)> {
    match request.total {
        Some(total) if !request.items.is_empty() && !total.is_zero() => Ok((request.items, total)),
        _ => Err(AppError::Validation(INVALID_ORDER.to_string())),
    }
}

/// Place an order. The submitted total is stored as-is.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn place(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>)> {
    let (items, total) = validate(parse_body(payload, INVALID_ORDER)?)?;

    let order = OrderRepository::new(state.pool())
        .create(user.id, &items, total)
        .await?;

    tracing::info!(order_id = %order.id, items = order.items.len(), total = %order.total, "Order placed");

    Ok((StatusCode::CREATED, Json(order)))
}

/// The caller's orders, most recent first.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn list(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Vec<Order>>> {
    let orders = OrderRepository::new(state.pool())
        .list_for_user(user.id)
        .await?;
    Ok(Json(orders))
}
