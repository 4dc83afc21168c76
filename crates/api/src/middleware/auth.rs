//! Authentication extractor.
//!
//! Verifies the `Authorization: Bearer <token>` header and yields the
//! caller's identity. Handlers that take [`RequireAuth`] reject
//! unauthenticated requests with 401 before running.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::{AppError, set_sentry_user};
use crate::models::CurrentUser;
use crate::services::auth::{AuthError, bearer_token};
use crate::state::AppState;

/// Extractor that requires a valid bearer token.
///
/// # Example
///
/// ```rust,ignore
/// async fn my_books(
///     State(state): State<AppState>,
///     RequireAuth(user): RequireAuth,
/// ) -> Result<Json<Vec<Book>>> { ... }
/// ```
pub struct RequireAuth(pub CurrentUser);

impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Malformed)?;

        let token = bearer_token(header)?;
        let claims = state.tokens().verify(token).inspect_err(|e| {
            tracing::debug!(error = ?e, path = %parts.uri.path(), "Rejected bearer token");
        })?;

        let user = CurrentUser::from(claims);
        set_sentry_user(&user.id, Some(&user.email));

        Ok(Self(user))
    }
}
