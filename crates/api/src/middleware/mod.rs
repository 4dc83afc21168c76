//! HTTP middleware for the API.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, transactions)
//! 2. `TraceLayer` (request span with status and latency)
//! 3. Request ID
//! 4. CORS
//! 5. ML rate limiting (ML routes only)
//!
//! Authentication is an extractor ([`RequireAuth`]) rather than a layer.

pub mod auth;
pub mod rate_limit;
pub mod request_id;

pub use auth::RequireAuth;
pub use rate_limit::{WindowRateLimiter, client_ip, ml_rate_limit};
pub use request_id::request_id_middleware;
