//! API configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `BAZAAR_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `BAZAAR_JWT_SECRET` - HS256 token signing secret (min 32 chars, high entropy)
//!
//! ## Optional
//! - `BAZAAR_HOST` - Bind address (default: 127.0.0.1)
//! - `BAZAAR_PORT` - Listen port (default: 5000)
//! - `BAZAAR_UPLOAD_DIR` - Directory for uploaded cover images (default: uploads)
//! - `BAZAAR_CORS_ORIGIN` - Allowed browser origin (default: any)
//! - `BAZAAR_TRUST_PROXY_HEADERS` - Key rate limits on `X-Forwarded-For` and
//!   similar headers instead of the peer address (default: false)
//! - `ML_SERVICE_URL` - ML inference service base URL (default: <http://127.0.0.1:8000>)
//! - `ML_TIMEOUT_SECS` - Upstream request timeout (default: 10)
//! - `ML_RATE_LIMIT_WINDOW_SECS` - Rate limit window length (default: 60)
//! - `ML_RATE_LIMIT_MAX` - Requests allowed per window per client (default: 50)
//! - `MAIL_SMTP_HOST` - SMTP relay host (default: smtp.gmail.com)
//! - `MAIL_SMTP_PORT` - SMTP relay port (default: 587)
//! - `MAIL_USER` / `MAIL_PASS` - SMTP credentials; the contact relay is disabled without them
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Transaction sample rate (default: 0.0)
//! - `LOG_FORMAT` - `json` for structured logs, anything else for text

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const MIN_JWT_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Shared secret for verifying bearer tokens
    pub jwt_secret: SecretString,
    /// Where uploaded cover images are written and served from
    pub upload_dir: PathBuf,
    /// Allowed CORS origin; `None` allows any origin
    pub cors_origin: Option<String>,
    /// Take client addresses from proxy headers; only safe behind a proxy
    /// that overwrites them
    pub trust_proxy_headers: bool,
    /// ML inference service settings
    pub ml: MlConfig,
    /// Outbound mail settings; `None` disables the contact relay
    pub mail: Option<MailConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Fraction of errors sent to Sentry
    pub sentry_sample_rate: f32,
    /// Fraction of transactions sent to Sentry
    pub sentry_traces_sample_rate: f32,
    /// Emit JSON logs instead of text
    pub log_json: bool,
}

/// ML inference service configuration.
#[derive(Debug, Clone)]
pub struct MlConfig {
    /// Base URL, e.g. `http://127.0.0.1:8000`
    pub base_url: Url,
    /// Per-request timeout for upstream calls
    pub timeout: Duration,
    /// Rate limit window length
    pub rate_limit_window: Duration,
    /// Requests allowed per client within one window
    pub rate_limit_max: u32,
}

/// SMTP relay configuration.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct MailConfig {
    /// SMTP relay host
    pub smtp_host: String,
    /// SMTP relay port
    pub smtp_port: u16,
    /// SMTP username
    pub username: String,
    /// SMTP password
    pub password: SecretString,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl ApiConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the token secret fails validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("BAZAAR_DATABASE_URL")?;
        let host = get_parsed_or_default("BAZAAR_HOST", "127.0.0.1")?;
        let port = get_parsed_or_default("BAZAAR_PORT", "5000")?;
        let jwt_secret = get_validated_secret("BAZAAR_JWT_SECRET")?;
        validate_jwt_secret(&jwt_secret, "BAZAAR_JWT_SECRET")?;

        Ok(Self {
            database_url,
            host,
            port,
            jwt_secret,
            upload_dir: PathBuf::from(get_env_or_default("BAZAAR_UPLOAD_DIR", "uploads")),
            cors_origin: get_optional_env("BAZAAR_CORS_ORIGIN"),
            trust_proxy_headers: get_parsed_or_default("BAZAAR_TRUST_PROXY_HEADERS", "false")?,
            ml: MlConfig::from_env()?,
            mail: MailConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: get_parsed_or_default("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: get_parsed_or_default("SENTRY_TRACES_SAMPLE_RATE", "0.0")?,
            log_json: get_optional_env("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        })
    }

    /// Configuration with every optional setting at its default, for embedding
    /// the server in-process (tests, tooling).
    ///
    /// Binds to an ephemeral local port, disables mail and Sentry.
    #[must_use]
    pub fn with_defaults(
        database_url: SecretString,
        jwt_secret: SecretString,
        ml_base_url: Url,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            database_url,
            host: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            jwt_secret,
            upload_dir,
            cors_origin: None,
            trust_proxy_headers: false,
            ml: MlConfig {
                base_url: ml_base_url,
                timeout: Duration::from_secs(10),
                rate_limit_window: Duration::from_secs(60),
                rate_limit_max: 50,
            },
            mail: None,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
            log_json: false,
        }
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl MlConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let base_url = get_env_or_default("ML_SERVICE_URL", "http://127.0.0.1:8000");
        let base_url = Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidEnvVar("ML_SERVICE_URL".to_string(), e.to_string()))?;
        let timeout_secs: u64 = get_parsed_or_default("ML_TIMEOUT_SECS", "10")?;
        let window_secs: u64 = get_parsed_or_default("ML_RATE_LIMIT_WINDOW_SECS", "60")?;
        let rate_limit_max: u32 = get_parsed_or_default("ML_RATE_LIMIT_MAX", "50")?;

        if window_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "ML_RATE_LIMIT_WINDOW_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(timeout_secs),
            rate_limit_window: Duration::from_secs(window_secs),
            rate_limit_max,
        })
    }
}

impl MailConfig {
    /// Mail is optional: both credentials present enables it, neither disables
    /// it, and only one of them is a configuration error.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let (username, password) = match (get_optional_env("MAIL_USER"), get_optional_env("MAIL_PASS")) {
            (Some(user), Some(pass)) => (user, SecretString::from(pass)),
            (None, None) => return Ok(None),
            (Some(_), None) => return Err(ConfigError::MissingEnvVar("MAIL_PASS".to_string())),
            (None, Some(_)) => return Err(ConfigError::MissingEnvVar("MAIL_USER".to_string())),
        };

        Ok(Some(Self {
            smtp_host: get_env_or_default("MAIL_SMTP_HOST", "smtp.gmail.com"),
            smtp_port: get_parsed_or_default("MAIL_SMTP_PORT", "587")?,
            username,
            password,
        }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable parsed into `T`, with a default.
fn get_parsed_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, &get_env_or_default(key, default))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate that the token secret meets minimum length requirements.
fn validate_jwt_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_JWT_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_JWT_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_config() -> ApiConfig {
        ApiConfig {
            database_url: SecretString::from("postgres://localhost/bookbazaar"),
            host: "127.0.0.1".parse().unwrap(),
            port: 5000,
            jwt_secret: SecretString::from("k".repeat(32)),
            upload_dir: PathBuf::from("uploads"),
            cors_origin: None,
            trust_proxy_headers: false,
            ml: MlConfig {
                base_url: Url::parse("http://127.0.0.1:8000").unwrap(),
                timeout: Duration::from_secs(10),
                rate_limit_window: Duration::from_secs(60),
                rate_limit_max: 50,
            },
            mail: None,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
            log_json: false,
        }
    }

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_single_char() {
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let err = validate_secret_strength("your-jwt-secret-here", "TEST_VAR").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let err = validate_secret_strength(&"ab".repeat(20), "TEST_VAR").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        assert!(validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR").is_ok());
    }

    #[test]
    fn test_validate_jwt_secret_length() {
        assert!(validate_jwt_secret(&SecretString::from("short"), "TEST_VAR").is_err());
        assert!(validate_jwt_secret(&SecretString::from("a".repeat(32)), "TEST_VAR").is_ok());
    }

    #[test]
    fn test_parse_value() {
        let port: u16 = parse_value("TEST_PORT", " 8080 ").unwrap();
        assert_eq!(port, 8080);

        let err = parse_value::<u16>("TEST_PORT", "eighty").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "TEST_PORT"));
    }

    #[test]
    fn test_socket_addr() {
        let addr = sample_config().socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 5000);
    }

    #[test]
    fn test_mail_config_debug_redacts_password() {
        let mail = MailConfig {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            username: "relay@bookbazaar.test".to_string(),
            password: SecretString::from("app-password-value"),
        };

        let debug_output = format!("{mail:?}");
        assert!(debug_output.contains("relay@bookbazaar.test"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("app-password-value"));
    }

    #[test]
    fn test_api_config_debug_hides_secrets() {
        let debug_output = format!("{:?}", sample_config());
        assert!(!debug_output.contains("postgres://localhost"));
        assert!(!debug_output.contains(&"k".repeat(32)));
    }
}
