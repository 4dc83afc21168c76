//! Services behind the route handlers.
//!
//! - `auth` - bearer token verification
//! - `email` - contact relay over SMTP
//! - `ml` - ML inference client, tag caching, autocomplete
//! - `uploads` - listing image storage

pub mod auth;
pub mod email;
pub mod ml;
pub mod uploads;

pub use auth::{AuthError, TokenClaims, TokenVerifier};
pub use email::{ContactMessage, ContactRequest, MailError, Mailer};
pub use ml::{MlClient, MlError, RetryPolicy};
pub use uploads::{ImageStore, UploadError};
