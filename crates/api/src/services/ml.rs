//! Client for the external ML inference service.
//!
//! Two upstream operations are used:
//!
//! - `POST {base}/predict-genre {summary}` - retried with exponential backoff
//!   while the service answers 429
//! - `POST {base}/extract-tags {summary}` - single attempt; results are
//!   cached on the listing once non-empty
//!
//! Autocomplete is served locally by [`autocomplete_suggestions`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;
use url::Url;

use bookbazaar_core::{BookId, DEFAULT_GENRE};

use crate::config::MlConfig;
use crate::db::{BookRepository, RepositoryError};

/// Tags returned when the service is rate limiting tag extraction.
pub const FALLBACK_TAGS: [&str; 3] = ["Book", "Reading", "Fiction"];

/// Suffixes appended to a query to build autocomplete suggestions.
const AUTOCOMPLETE_SUFFIXES: [&str; 3] = [" book", " author", " genre"];

/// Errors that can occur when calling the ML service.
#[derive(Debug, Error)]
pub enum MlError {
    /// HTTP request failed (connection, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered 429.
    #[error("ML rate limit hit")]
    RateLimited {
        /// `Retry-After` seconds, when the service sent one.
        retry_after: Option<u64>,
    },

    /// The service answered with another non-success status.
    #[error("ML service returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// The response body was not JSON.
    #[error("parse error: {0}")]
    Parse(String),
}

impl MlError {
    /// Whether the service signalled rate limiting.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Backoff for genre prediction: wait `base_delay * 2^attempt` after a 429
/// on every attempt but the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first rate-limited attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after rate-limited attempt `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Serialize)]
struct SummaryRequest<'a> {
    summary: &'a str,
}

/// ML inference service client.
#[derive(Clone)]
pub struct MlClient {
    inner: Arc<MlClientInner>,
}

struct MlClientInner {
    client: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl MlClient {
    /// Create a client with the default retry policy.
    ///
    /// # Errors
    ///
    /// Returns `MlError::Http` if the HTTP client cannot be built.
    pub fn new(config: &MlConfig) -> Result<Self, MlError> {
        Self::with_retry_policy(config, RetryPolicy::default())
    }

    /// Create a client with a custom retry policy.
    ///
    /// # Errors
    ///
    /// Returns `MlError::Http` if the HTTP client cannot be built.
    pub fn with_retry_policy(config: &MlConfig, retry: RetryPolicy) -> Result<Self, MlError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            inner: Arc::new(MlClientInner {
                client,
                base_url: config.base_url.clone(),
                retry,
            }),
        })
    }

    /// Predict genres for a summary.
    ///
    /// Falls back to `["General"]` when the service answers without genres.
    ///
    /// # Errors
    ///
    /// Returns `MlError::RateLimited` if every attempt was rate limited, or
    /// the first non-rate-limit failure.
    #[instrument(skip(self, summary), fields(summary_len = summary.len()))]
    pub async fn predict_genre(&self, summary: &str) -> Result<Vec<String>, MlError> {
        let policy = self.inner.retry;
        let mut attempt = 0;

        loop {
            match self.post("predict-genre", summary).await {
                Ok(body) => return Ok(genres_from(&body)),
                Err(err) if err.is_rate_limited() && attempt + 1 < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "ML service rate limited genre prediction, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Extract tags for a summary. Single attempt.
    ///
    /// # Errors
    ///
    /// Returns any `MlError` from the call.
    #[instrument(skip(self, summary), fields(summary_len = summary.len()))]
    pub async fn extract_tags(&self, summary: &str) -> Result<Vec<String>, MlError> {
        let body = self.post("extract-tags", summary).await?;
        Ok(body.get("tags").map(string_list).unwrap_or_default())
    }

    async fn post(&self, operation: &str, summary: &str) -> Result<Value, MlError> {
        let url = format!(
            "{}/{operation}",
            self.inner.base_url.as_str().trim_end_matches('/')
        );

        let response = self
            .inner
            .client
            .post(url)
            .json(&SummaryRequest { summary })
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(MlError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MlError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| MlError::Parse(e.to_string()))
    }
}

/// Read a string or list of strings, dropping blanks.
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => [s.as_str()]
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

/// Genres from a prediction body (`predicted_genre`, or `genre`).
fn genres_from(body: &Value) -> Vec<String> {
    let genres = body
        .get("predicted_genre")
        .or_else(|| body.get("genre"))
        .map(string_list)
        .unwrap_or_default();

    if genres.is_empty() {
        vec![DEFAULT_GENRE.to_owned()]
    } else {
        genres
    }
}

/// Autocomplete suggestions for a query: the query with each fixed suffix.
#[must_use]
pub fn autocomplete_suggestions(query: &str) -> Vec<String> {
    AUTOCOMPLETE_SUFFIXES
        .iter()
        .map(|suffix| format!("{query}{suffix}"))
        .collect()
}

// =============================================================================
// Tag caching
// =============================================================================

/// Where listing summaries are read from and extracted tags are kept.
pub trait TagStore {
    /// The listing's summary and currently cached tags, if it exists.
    fn load(
        &self,
        id: BookId,
    ) -> impl Future<Output = Result<Option<(String, Vec<String>)>, RepositoryError>> + Send;

    /// Persist tags onto the listing.
    fn save(
        &self,
        id: BookId,
        tags: &[String],
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

impl TagStore for BookRepository<'_> {
    async fn load(&self, id: BookId) -> Result<Option<(String, Vec<String>)>, RepositoryError> {
        self.summary_and_tags(id).await
    }

    async fn save(&self, id: BookId, tags: &[String]) -> Result<(), RepositoryError> {
        self.set_tags(id, tags).await
    }
}

/// Tags for a listing and whether they came from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagResult {
    pub tags: Vec<String>,
    pub cached: bool,
}

/// Errors from [`tags_for_book`].
#[derive(Debug, Error)]
pub enum TagError {
    #[error("Book not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] RepositoryError),

    #[error(transparent)]
    Ml(#[from] MlError),
}

/// Return a listing's tags, extracting and caching them on first use.
///
/// Cached non-empty tags are returned without calling the service.
///
/// # Errors
///
/// Returns `TagError::NotFound` for an unknown listing, or the store or
/// service error.
#[instrument(skip(store, ml))]
pub async fn tags_for_book<S>(store: &S, ml: &MlClient, id: BookId) -> Result<TagResult, TagError>
where
    S: TagStore + Sync,
{
    let (summary, cached) = store.load(id).await?.ok_or(TagError::NotFound)?;
    if !cached.is_empty() {
        return Ok(TagResult {
            tags: cached,
            cached: true,
        });
    }

    let tags = ml.extract_tags(&summary).await?;
    store.save(id, &tags).await?;
    tracing::info!(book_id = %id, count = tags.len(), "Cached extracted tags");

    Ok(TagResult {
        tags,
        cached: false,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use serde_json::json;

    use super::*;

    /// Mock upstream: answers 429 for the first `rate_limited` calls, then `body`.
    #[derive(Clone)]
    struct Upstream {
        calls: Arc<AtomicUsize>,
        rate_limited: usize,
        body: Value,
    }

    async fn respond(State(upstream): State<Upstream>) -> (StatusCode, Json<Value>) {
        let n = upstream.calls.fetch_add(1, Ordering::SeqCst);
        if n < upstream.rate_limited {
            (StatusCode::TOO_MANY_REQUESTS, Json(json!({"error": "slow down"})))
        } else {
            (StatusCode::OK, Json(upstream.body.clone()))
        }
    }

    async fn spawn_upstream(rate_limited: usize, body: Value) -> (MlClient, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let upstream = Upstream {
            calls: Arc::clone(&calls),
            rate_limited,
            body,
        };
        let app = Router::new()
            .route("/predict-genre", post(respond))
            .route("/extract-tags", post(respond))
            .with_state(upstream);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = MlConfig {
            base_url: Url::parse(&format!("http://{addr}")).unwrap(),
            timeout: Duration::from_secs(5),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 50,
        };
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
        };
        (MlClient::with_retry_policy(&config, retry).unwrap(), calls)
    }

    #[derive(Default)]
    struct MemoryTags {
        books: Mutex<HashMap<BookId, (String, Vec<String>)>>,
    }

    impl TagStore for MemoryTags {
        async fn load(&self, id: BookId) -> Result<Option<(String, Vec<String>)>, RepositoryError> {
            Ok(self.books.lock().unwrap().get(&id).cloned())
        }

        async fn save(&self, id: BookId, tags: &[String]) -> Result<(), RepositoryError> {
            if let Some(entry) = self.books.lock().unwrap().get_mut(&id) {
                entry.1 = tags.to_vec();
            }
            Ok(())
        }
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_genres_from_body_shapes() {
        assert_eq!(genres_from(&json!({"predicted_genre": "Fantasy"})), vec!["Fantasy"]);
        assert_eq!(
            genres_from(&json!({"genre": ["Science", " History "]})),
            vec!["Science", "History"]
        );
        assert_eq!(genres_from(&json!({"predicted_genre": []})), vec!["General"]);
        assert_eq!(genres_from(&json!({})), vec!["General"]);
    }

    #[test]
    fn test_autocomplete_suggestions() {
        assert_eq!(
            autocomplete_suggestions("harry"),
            vec!["harry book", "harry author", "harry genre"]
        );
    }

    #[tokio::test]
    async fn test_predict_genre_retries_after_rate_limits() {
        let (ml, calls) = spawn_upstream(2, json!({"predicted_genre": ["Fantasy"]})).await;

        let genres = ml.predict_genre("A wizard's tale").await.unwrap();

        assert_eq!(genres, vec!["Fantasy"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_predict_genre_gives_up_after_three_attempts() {
        let (ml, calls) = spawn_upstream(usize::MAX, json!({})).await;

        let err = ml.predict_genre("A wizard's tale").await.unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_extract_tags_single_attempt() {
        let (ml, calls) = spawn_upstream(1, json!({"tags": ["magic"]})).await;

        let err = ml.extract_tags("summary").await.unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tags_for_book_caches_after_first_call() {
        let (ml, calls) = spawn_upstream(0, json!({"tags": ["wizards", "school"]})).await;
        let store = MemoryTags::default();
        let id = BookId::generate();
        store
            .books
            .lock()
            .unwrap()
            .insert(id, ("A boy learns magic".to_owned(), Vec::new()));

        let first = tags_for_book(&store, &ml, id).await.unwrap();
        let second = tags_for_book(&store, &ml, id).await.unwrap();

        assert_eq!(first.tags, vec!["wizards", "school"]);
        assert!(!first.cached);
        assert_eq!(second.tags, first.tags);
        assert!(second.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tags_for_unknown_book() {
        let (ml, calls) = spawn_upstream(0, json!({"tags": ["x"]})).await;
        let store = MemoryTags::default();

        let err = tags_for_book(&store, &ml, BookId::generate()).await.unwrap_err();

        assert!(matches!(err, TagError::NotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
