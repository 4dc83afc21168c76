//! Recently viewed listings.

use std::sync::Arc;

use bookbazaar_core::{Book, BookId, InteractionKind};
use tracing::instrument;

use crate::api::BazaarClient;
use crate::error::ClientError;
use crate::store::{self, LocalStore, RECENTLY_VIEWED_KEY, StoreError};

/// How many listing ids the history keeps.
pub const MAX_RECENTLY_VIEWED: usize = 10;

/// Recently viewed listing ids, oldest first.
#[derive(Clone)]
pub struct RecentlyViewed {
    store: Arc<dyn LocalStore>,
}

impl RecentlyViewed {
    #[must_use]
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Viewed ids, most recent last.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn ids(&self) -> Result<Vec<BookId>, StoreError> {
        store::load(self.store.as_ref(), RECENTLY_VIEWED_KEY)
    }

    /// Record a view locally. Viewing a listing again moves it to the end;
    /// the oldest entries fall off past [`MAX_RECENTLY_VIEWED`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn push(&self, id: BookId) -> Result<(), StoreError> {
        store::modify(self.store.as_ref(), RECENTLY_VIEWED_KEY, |ids: &mut Vec<BookId>| {
            ids.retain(|existing| *existing != id);
            ids.push(id);
            if ids.len() > MAX_RECENTLY_VIEWED {
                ids.drain(..ids.len() - MAX_RECENTLY_VIEWED);
            }
        })
    }

    /// Record a view and, when signed in, count it server-side.
    ///
    /// The interaction is best effort: a failure is logged and the local
    /// history is still updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    #[instrument(skip(self, client), fields(book_id = %id))]
    pub async fn view(&self, client: &BazaarClient, id: BookId) -> Result<(), StoreError> {
        self.push(id)?;
        if client.is_signed_in()
            && let Err(e) = client.record_interaction(id, InteractionKind::View).await
        {
            tracing::warn!(book_id = %id, error = %e, "Failed to record view");
        }
        Ok(())
    }

    /// The viewed listings, most recent first. Listings deleted since they
    /// were viewed are left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the request fails.
    #[instrument(skip_all)]
    pub async fn books(&self, client: &BazaarClient) -> Result<Vec<Book>, ClientError> {
        let ids = self.ids()?;
        let mut books = client.books_by_ids(&ids).await?;
        books.sort_by_key(|b| {
            std::cmp::Reverse(ids.iter().position(|id| *id == b.id).unwrap_or(0))
        });
        Ok(books)
    }

    /// Forget the history.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(RECENTLY_VIEWED_KEY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use axum::extract::Query;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use secrecy::SecretString;
    use serde_json::{Value, json};

    use super::*;
    use crate::mock::{book_json, serve};
    use crate::store::MemoryStore;

    fn history() -> RecentlyViewed {
        RecentlyViewed::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_reviewing_moves_to_end() {
        let history = history();
        let (a, b, c) = (BookId::generate(), BookId::generate(), BookId::generate());
        history.push(a).unwrap();
        history.push(b).unwrap();
        history.push(c).unwrap();
        history.push(a).unwrap();

        assert_eq!(history.ids().unwrap(), vec![b, c, a]);
    }

    #[test]
    fn test_concurrent_views_keep_bound_and_latest() {
        let history = history();
        let ids: Vec<BookId> = (0..40).map(|_| BookId::generate()).collect();

        std::thread::scope(|scope| {
            for chunk in ids.chunks(10) {
                let history = history.clone();
                scope.spawn(move || {
                    for id in chunk {
                        history.push(*id).unwrap();
                    }
                });
            }
        });

        let kept = history.ids().unwrap();
        assert_eq!(kept.len(), MAX_RECENTLY_VIEWED);
        let mut unique = kept.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), MAX_RECENTLY_VIEWED);
    }

    #[test]
    fn test_keeps_last_ten() {
        let history = history();
        let ids: Vec<BookId> = (0..12).map(|_| BookId::generate()).collect();
        for id in &ids {
            history.push(*id).unwrap();
        }

        let kept = history.ids().unwrap();
        assert_eq!(kept.len(), MAX_RECENTLY_VIEWED);
        assert_eq!(kept, ids[2..].to_vec());
    }

    #[tokio::test]
    async fn test_view_records_interaction_when_signed_in() {
        let posted = Arc::new(Mutex::new(Vec::<Value>::new()));
        let sink = Arc::clone(&posted);
        let app = Router::new().route(
            "/api/interactions",
            post(move |Json(body): Json<Value>| async move {
                sink.lock().unwrap().push(body.clone());
                Json(json!({
                    "userId": uuid::Uuid::new_v4().to_string(),
                    "bookId": body["bookId"],
                    "type": body["type"],
                    "count": 1,
                    "timestamp": "2024-05-01T12:00:00Z",
                }))
            }),
        );
        let client = BazaarClient::new(&serve(app).await).unwrap();
        let history = history();
        let id = BookId::generate();

        history.view(&client, id).await.unwrap();
        assert!(posted.lock().unwrap().is_empty());

        history
            .view(&client.with_token(SecretString::from("tok")), id)
            .await
            .unwrap();
        let posted = posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0]["type"], "view");
        assert_eq!(history.ids().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_view_survives_failed_interaction() {
        let client = BazaarClient::new("http://127.0.0.1:9")
            .unwrap()
            .with_token(SecretString::from("tok"));
        let history = history();
        let id = BookId::generate();

        history.view(&client, id).await.unwrap();
        assert_eq!(history.ids().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_books_most_recent_first() {
        let app = Router::new().route(
            "/api/books/by-ids",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let books: Vec<Value> = q["ids"]
                    .split(',')
                    .map(|id| book_json(BookId::parse(id).unwrap(), "Any", 100))
                    .collect();
                Json(Value::Array(books))
            }),
        );
        let client = BazaarClient::new(&serve(app).await).unwrap();
        let history = history();
        let (a, b) = (BookId::generate(), BookId::generate());
        history.push(a).unwrap();
        history.push(b).unwrap();

        let books = history.books(&client).await.unwrap();
        let order: Vec<BookId> = books.iter().map(|b| b.id).collect();
        assert_eq!(order, vec![b, a]);
    }
}
