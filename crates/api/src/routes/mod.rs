//! HTTP routes for the marketplace API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health, /health/ready     - liveness / readiness
//! /api/books/...                  - catalog (see `books`)
//! /api/orders                     - orders (auth)
//! /api/favorites                  - favorites (auth)
//! /api/interactions               - interaction counters (auth)
//! /api/ml/...                     - ML proxy (rate limited)
//! POST /api/contact               - contact relay
//! GET  /uploads/*                 - stored listing images
//! ```

pub mod books;
pub mod contact;
pub mod favorites;
pub mod health;
pub mod interactions;
pub mod ml;
pub mod orders;

use std::time::Duration;

use axum::{
    Json, Router,
    extract::rejection::JsonRejection,
    http::{HeaderValue, Request, Response},
    middleware,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::{DefaultOnResponse, OnResponse, TraceLayer},
};
use tracing::Span;

use crate::error::{AppError, Result};
use crate::middleware::request_id_middleware;
use crate::state::AppState;

/// Decode a JSON body into `T`; any failure is a validation error carrying
/// `message`.
pub(crate) fn parse_body<T: DeserializeOwned>(
    payload: std::result::Result<Json<Value>, JsonRejection>,
    message: &str,
) -> Result<T> {
    let Json(value) = payload.map_err(|e| {
        tracing::debug!(error = %e, "Rejected request body");
        AppError::Validation(message.to_string())
    })?;

    serde_json::from_value(value).map_err(|e| {
        tracing::debug!(error = %e, "Request body has the wrong shape");
        AppError::Validation(message.to_string())
    })
}

/// All routes, before state and outer layers.
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(books::router())
        .merge(orders::router())
        .merge(favorites::router())
        .merge(interactions::router())
        .merge(ml::router(state))
        .merge(contact::router())
        .nest_service("/uploads", ServeDir::new(state.images().dir()))
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let Some(origin) = origin else {
        return CorsLayer::permissive();
    };

    match HeaderValue::from_str(origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            tracing::error!(error = %e, "BAZAAR_CORS_ORIGIN is not a valid header value; cross-origin requests disabled");
            CorsLayer::new()
        }
    }
}

/// The complete application: routes, middleware, state and Sentry layers.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(state.config().cors_origin.as_deref());

    routes(&state)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(|response: &Response<_>, latency: Duration, span: &Span| {
                    span.record("status", response.status().as_u16());
                    span.record(
                        "latency_ms",
                        u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    );
                    DefaultOnResponse::default().on_response(response, latency, span);
                }),
        )
        .with_state(state)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::SocketAddr;

    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{StatusCode, header},
    };
    use secrecy::SecretString;
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;
    use url::Url;

    use bookbazaar_core::{BookId, UserId};

    use super::*;
    use crate::config::ApiConfig;
    use crate::services::auth::TokenClaims;

    const SECRET: &str = "q8Z!v2@Lm#4Rt$7Wx%1Np^9Ks&3Hd*6F";

    /// State over a pool that never connects; only routes that fail before
    /// touching the database are exercised here.
    fn test_state(rate_limit_max: u32) -> AppState {
        let mut config = ApiConfig::with_defaults(
            SecretString::from("postgres://bookbazaar@127.0.0.1:1/unused"),
            SecretString::from(SECRET),
            Url::parse("http://127.0.0.1:1").unwrap(),
            std::env::temp_dir().join("bookbazaar-router-tests"),
        );
        config.ml.rate_limit_max = rate_limit_max;

        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://bookbazaar@127.0.0.1:1/unused")
            .unwrap();
        AppState::new(config, pool).unwrap()
    }

    fn token(state: &AppState, exp: Option<i64>) -> String {
        state
            .tokens()
            .sign(&TokenClaims {
                id: UserId::generate(),
                email: "reader@example.com".to_owned(),
                name: "Reader".to_owned(),
                exp,
            })
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &Value, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(test_state(50)).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let (status, body) = send(app(test_state(50)), get("/api/books/my-books")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Not authorized, token missing" }));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let state = test_state(50);
        let token = token(&state, Some(1));
        let request = Request::builder()
            .uri("/api/orders")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(app(state), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Token expired" }));
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let request = Request::builder()
            .uri("/api/favorites")
            .header(header::AUTHORIZATION, "Bearer not.a.token")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app(test_state(50)), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Not authorized, token invalid" }));
    }

    #[tokio::test]
    async fn test_catalog_validation_errors() {
        let (status, body) = send(app(test_state(50)), get("/api/books/by-ids?ids=a,b")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid or missing IDs" }));

        let (status, body) = send(app(test_state(50)), get("/api/books/by-ids")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid or missing IDs" }));

        let (status, body) = send(app(test_state(50)), get("/api/books/genre")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Genre is required" }));

        let (status, _) = send(app(test_state(50)), get("/api/books/not-an-id")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_order_validation() {
        let state = test_state(50);
        let token = token(&state, None);
        let (status, body) = send(
            app(state),
            post_json("/api/orders", &json!({ "items": [], "total": 10 }), Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid order data" }));
    }

    #[tokio::test]
    async fn test_favorite_validation() {
        let state = test_state(50);
        let token = token(&state, None);
        let (status, body) = send(
            app(state.clone()),
            post_json("/api/favorites", &json!({ "bookId": "42" }), Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid or missing bookId" }));

        let request = Request::builder()
            .method("DELETE")
            .uri("/api/favorites/42")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app(state), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid bookId for removal" }));
    }

    #[tokio::test]
    async fn test_ml_validation() {
        let (status, body) = send(
            app(test_state(50)),
            post_json("/api/ml/predict-genre", &json!({ "summary": "  " }), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Summary is required" }));

        let (status, body) = send(
            app(test_state(50)),
            post_json("/api/ml/extract-tags", &json!({}), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "bookId is required" }));

        let (status, body) = send(app(test_state(50)), get("/api/ml/autocomplete")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Query parameter required" }));
    }

    #[tokio::test]
    async fn test_autocomplete_accepts_query_and_alias() {
        let expected = json!({ "suggestions": ["dune book", "dune author", "dune genre"] });

        let (status, body) = send(app(test_state(50)), get("/api/ml/autocomplete?query=dune")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, expected);

        let (_, body) = send(app(test_state(50)), get("/api/ml/autocomplete?q=dune")).await;
        assert_eq!(body, expected);
    }

    #[tokio::test]
    async fn test_ml_routes_rate_limited() {
        let app = app(test_state(2));
        let peer: SocketAddr = "198.51.100.20:41000".parse().unwrap();
        let request = || {
            Request::builder()
                .uri("/api/ml/autocomplete?q=x")
                .extension(ConnectInfo(peer))
                .body(Body::empty())
                .unwrap()
        };

        assert_eq!(send(app.clone(), request()).await.0, StatusCode::OK);
        assert_eq!(send(app.clone(), request()).await.0, StatusCode::OK);
        let (status, body) = send(app.clone(), request()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body, json!({ "error": "Too many ML requests. Try again later." }));

        // Non-ML routes are not limited.
        assert_eq!(send(app, get("/api/books/genre")).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_contact_validation_and_disabled_mail() {
        let (status, body) = send(
            app(test_state(50)),
            post_json("/api/contact", &json!({ "sellerEmail": "s@example.com" }), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "All fields are required." }));

        let complete = json!({
            "sellerEmail": "seller@example.com",
            "buyerName": "Ada",
            "buyerEmail": "ada@example.org",
            "message": "Still available?"
        });
        let (status, body) = send(app(test_state(50)), post_json("/api/contact", &complete, None)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, json!({ "error": "Failed to send message" }));
    }

    #[tokio::test]
    async fn test_failed_listing_write_discards_upload() {
        let upload_dir = std::env::temp_dir().join(format!("bookbazaar-discard-{}", BookId::generate()));
        let config = ApiConfig::with_defaults(
            SecretString::from("postgres://bookbazaar@127.0.0.1:1/unused"),
            SecretString::from(SECRET),
            Url::parse("http://127.0.0.1:1").unwrap(),
            upload_dir.clone(),
        );
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(500))
            .connect_lazy("postgres://bookbazaar@127.0.0.1:1/unused")
            .unwrap();
        let state = AppState::new(config, pool).unwrap();
        state.images().ensure_dir().await.unwrap();
        let token = token(&state, None);

        let boundary = "bazaar-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nDune\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"summary\"\r\n\r\nSpice\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"price\"\r\n\r\n150\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"cover.png\"\r\n\
             Content-Type: image/png\r\n\r\nnot-really-a-png\r\n\
             --{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/books/add")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();

        let (status, _) = send(app(state), request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let mut entries = tokio::fs::read_dir(&upload_dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        tokio::fs::remove_dir_all(&upload_dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_upload_is_404() {
        let name = format!("{}.png", BookId::generate());
        let response = app(test_state(50))
            .oneshot(get(&format!("/uploads/{name}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
