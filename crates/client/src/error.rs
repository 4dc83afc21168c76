//! Client error type.

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur when talking to the API or the local store.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed (connection, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API rejected the bearer token (or none was sent).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The API is rate limiting this client.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The API answered with another error status.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// The `error` field of the response body, or the raw body.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The operation needs a bearer token and the client has none.
    #[error("not signed in")]
    NotSignedIn,

    /// Checkout was attempted with nothing in the cart.
    #[error("cart is empty")]
    EmptyCart,

    /// The base URL could not be joined with a route.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Local state could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClientError {
    /// HTTP status of an API-level failure, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized(_) => Some(401),
            Self::RateLimited(_) => Some(429),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
