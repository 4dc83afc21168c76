//! Search-box suggestions, debounced and memoized.
//!
//! Each keystroke calls [`Autocomplete::suggest`]. A call waits out the
//! debounce interval and gives up if a newer call arrived meanwhile, so only
//! the last keystroke of a burst reaches the API. Results are cached per
//! query for the life of the process.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use tracing::instrument;

use crate::api::BazaarClient;
use crate::error::ClientError;

/// Quiet period before a keystroke is looked up.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Distinct queries kept in the memo.
const MEMO_CAPACITY: u64 = 500;

/// Where suggestions come from.
pub trait SuggestionSource: Send + Sync {
    /// Suggestions for a non-blank query.
    fn suggestions(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<Vec<String>, ClientError>> + Send;
}

impl SuggestionSource for BazaarClient {
    async fn suggestions(&self, query: &str) -> Result<Vec<String>, ClientError> {
        self.autocomplete(query).await
    }
}

/// Debounced, memoized suggestion lookup.
pub struct Autocomplete<S> {
    source: S,
    memo: Cache<String, Vec<String>>,
    debounce: Duration,
    latest: AtomicU64,
}

impl<S: SuggestionSource> Autocomplete<S> {
    /// Wrap `source` with the default 300 ms debounce.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self::with_debounce(source, DEFAULT_DEBOUNCE)
    }

    #[must_use]
    pub fn with_debounce(source: S, debounce: Duration) -> Self {
        Self {
            source,
            memo: Cache::builder().max_capacity(MEMO_CAPACITY).build(),
            debounce,
            latest: AtomicU64::new(0),
        }
    }

    /// Suggestions for a keystroke.
    ///
    /// Returns `Ok(None)` when a newer call superseded this one during the
    /// debounce wait. A blank query resolves to an empty list at once.
    ///
    /// # Errors
    ///
    /// Returns the source's error for an uncached query.
    #[instrument(skip(self))]
    pub async fn suggest(&self, query: &str) -> Result<Option<Vec<String>>, ClientError> {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        if query.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }

        tokio::time::sleep(self.debounce).await;
        if self.latest.load(Ordering::SeqCst) != ticket {
            tracing::trace!(query, "Superseded by a newer keystroke");
            return Ok(None);
        }

        self.lookup(query).await.map(Some)
    }

    /// Suggestions for `query` without debouncing, from the memo when
    /// possible.
    ///
    /// # Errors
    ///
    /// Returns the source's error for an uncached query. Errors are not
    /// cached.
    pub async fn lookup(&self, query: &str) -> Result<Vec<String>, ClientError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(cached) = self.memo.get(query).await {
            tracing::debug!(query, "Suggestion memo hit");
            return Ok(cached);
        }

        let suggestions = self.source.suggestions(query).await?;
        self.memo.insert(query.to_owned(), suggestions.clone()).await;
        Ok(suggestions)
    }
}
