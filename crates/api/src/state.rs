//! Application state shared across handlers.

use std::sync::Arc;

use lettre::transport::smtp::Error as SmtpError;
use sqlx::PgPool;

use crate::config::ApiConfig;
use crate::middleware::WindowRateLimiter;
use crate::services::{ImageStore, Mailer, MlClient, MlError, TokenVerifier};

/// Error building application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("ML client: {0}")]
    Ml(#[from] MlError),
    #[error("mail transport: {0}")]
    Mail(#[from] SmtpError),
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ApiConfig,
    pool: PgPool,
    tokens: TokenVerifier,
    ml: MlClient,
    mailer: Option<Mailer>,
    images: ImageStore,
    ml_rate_limiter: WindowRateLimiter,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Mail is disabled when the configuration has no SMTP credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the ML client or mail transport cannot be built.
    pub fn new(config: ApiConfig, pool: PgPool) -> Result<Self, StateError> {
        let ml = MlClient::new(&config.ml)?;
        Self::with_ml_client(config, pool, ml)
    }

    /// Create application state around an existing ML client.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail transport cannot be built.
    pub fn with_ml_client(config: ApiConfig, pool: PgPool, ml: MlClient) -> Result<Self, StateError> {
        let tokens = TokenVerifier::new(config.jwt_secret.clone());
        let mailer = config.mail.as_ref().map(Mailer::new).transpose()?;
        if mailer.is_none() {
            tracing::warn!("MAIL_USER/MAIL_PASS not set; contact relay disabled");
        }
        let images = ImageStore::new(config.upload_dir.clone());
        let ml_rate_limiter =
            WindowRateLimiter::new(config.ml.rate_limit_window, config.ml.rate_limit_max)
                .with_proxy_headers(config.trust_proxy_headers);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                tokens,
                ml,
                mailer,
                images,
                ml_rate_limiter,
            }),
        })
    }

    /// Get a reference to the API configuration.
    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Get a reference to the bearer token verifier.
    #[must_use]
    pub fn tokens(&self) -> &TokenVerifier {
        &self.inner.tokens
    }

    /// Get a reference to the ML inference client.
    #[must_use]
    pub fn ml(&self) -> &MlClient {
        &self.inner.ml
    }

    /// The contact mailer, if mail is configured.
    #[must_use]
    pub fn mailer(&self) -> Option<&Mailer> {
        self.inner.mailer.as_ref()
    }

    /// Get a reference to the listing image store.
    #[must_use]
    pub fn images(&self) -> &ImageStore {
        &self.inner.images
    }

    /// Get a reference to the ML route rate limiter.
    #[must_use]
    pub fn ml_rate_limiter(&self) -> &WindowRateLimiter {
        &self.inner.ml_rate_limiter
    }
}
