//! Liked books and their sync with server favorites.
//!
//! Toggling a like always updates local state first. When the client is
//! signed in the change is then sent to the favorites API; a change that
//! cannot be sent is queued under `pendingFavorites` and replayed by
//! [`LikedBooks::flush_pending`]. Only the latest intent per listing is kept
//! in the queue. After sign-in, [`LikedBooks::reconcile`] uploads likes made
//! while signed out and then mirrors the server's list.

use std::collections::HashSet;
use std::sync::Arc;

use bookbazaar_core::{BookId, InteractionKind};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::BazaarClient;
use crate::error::ClientError;
use crate::store::{self, LIKED_BOOKS_KEY, LocalStore, PENDING_FAVORITES_KEY, StoreError};

/// A favorite change waiting to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFavorite {
    pub book_id: BookId,
    /// `true` to add the favorite, `false` to remove it.
    pub liked: bool,
}

/// Liked listing ids over a [`LocalStore`].
#[derive(Clone)]
pub struct LikedBooks {
    store: Arc<dyn LocalStore>,
}

impl LikedBooks {
    #[must_use]
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Liked ids in the order they were liked.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn ids(&self) -> Result<Vec<BookId>, StoreError> {
        store::load(self.store.as_ref(), LIKED_BOOKS_KEY)
    }

    /// Whether `id` is liked.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_liked(&self, id: BookId) -> Result<bool, StoreError> {
        Ok(self.ids()?.contains(&id))
    }

    /// Changes not yet accepted by the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn pending(&self) -> Result<Vec<PendingFavorite>, StoreError> {
        store::load(self.store.as_ref(), PENDING_FAVORITES_KEY)
    }

    /// Flip the like on `id` locally and return the new state.
    fn flip(&self, id: BookId) -> Result<bool, StoreError> {
        store::modify(self.store.as_ref(), LIKED_BOOKS_KEY, |ids: &mut Vec<BookId>| {
            let before = ids.len();
            ids.retain(|existing| *existing != id);
            let liked = ids.len() == before;
            if liked {
                ids.push(id);
            }
            liked
        })
    }

    fn edit_pending(&self, change: impl FnOnce(&mut Vec<PendingFavorite>)) -> Result<(), StoreError> {
        store::modify(self.store.as_ref(), PENDING_FAVORITES_KEY, change)
    }

    /// Queue a change, replacing any earlier queued change for the listing.
    fn enqueue(&self, change: PendingFavorite) -> Result<(), StoreError> {
        self.edit_pending(|pending| {
            pending.retain(|p| p.book_id != change.book_id);
            pending.push(change);
        })
    }

    fn dequeue(&self, id: BookId) -> Result<(), StoreError> {
        self.edit_pending(|pending| pending.retain(|p| p.book_id != id))
    }

    async fn send(client: &BazaarClient, change: PendingFavorite) -> Result<(), ClientError> {
        if change.liked {
            client.add_favorite(change.book_id).await
        } else {
            client.remove_favorite(change.book_id).await
        }
    }

    /// Flip the like on `id` and return the new state.
    ///
    /// The local change is never rolled back. When signed in, the change is
    /// sent to the server or queued if that fails, and a new like is also
    /// counted as a `favorite` interaction.
    ///
    /// # Errors
    ///
    /// Returns an error only if local state cannot be read or written.
    #[instrument(skip(self, client), fields(book_id = %id))]
    pub async fn toggle(&self, client: &BazaarClient, id: BookId) -> Result<bool, StoreError> {
        let liked = self.flip(id)?;

        if !client.is_signed_in() {
            return Ok(liked);
        }

        let change = PendingFavorite { book_id: id, liked };
        match Self::send(client, change).await {
            Ok(()) => self.dequeue(id)?,
            Err(e) => {
                tracing::warn!(book_id = %id, liked, error = %e, "Favorite sync failed, queued for retry");
                self.enqueue(change)?;
            }
        }

        if liked
            && let Err(e) = client.record_interaction(id, InteractionKind::Favorite).await
        {
            tracing::warn!(book_id = %id, error = %e, "Failed to record favorite interaction");
        }

        Ok(liked)
    }

    /// Replay queued changes. Changes that fail again stay queued.
    ///
    /// Returns how many changes the server accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotSignedIn`] without a token, or a store
    /// error.
    #[instrument(skip_all)]
    pub async fn flush_pending(&self, client: &BazaarClient) -> Result<usize, ClientError> {
        if !client.is_signed_in() {
            return Err(ClientError::NotSignedIn);
        }

        let mut sent = Vec::new();
        for change in self.pending()? {
            match Self::send(client, change).await {
                Ok(()) => sent.push(change),
                Err(e) => {
                    tracing::debug!(book_id = %change.book_id, error = %e, "Favorite still failing");
                }
            }
        }

        // Changes queued while replaying stay queued.
        self.edit_pending(|pending| pending.retain(|p| !sent.contains(p)))?;
        if !sent.is_empty() {
            tracing::info!(sent = sent.len(), "Replayed favorite changes");
        }
        Ok(sent.len())
    }

    /// Bring local likes and server favorites together after sign-in.
    ///
    /// Queued changes are replayed, likes the server does not know about are
    /// uploaded, and the local list is then replaced by the server's list
    /// (plus any adds that are still queued). Returns the resulting ids.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in, the favorites cannot be fetched,
    /// or local state cannot be written.
    #[instrument(skip_all)]
    pub async fn reconcile(&self, client: &BazaarClient) -> Result<Vec<BookId>, ClientError> {
        self.flush_pending(client).await?;

        let server = Self::server_ids(client).await?;
        let known: HashSet<BookId> = server.iter().copied().collect();
        let local_only: Vec<BookId> = self
            .ids()?
            .into_iter()
            .filter(|id| !known.contains(id))
            .collect();

        for id in &local_only {
            let change = PendingFavorite {
                book_id: *id,
                liked: true,
            };
            if let Err(e) = Self::send(client, change).await {
                tracing::warn!(book_id = %id, error = %e, "Could not upload local like");
                self.enqueue(change)?;
            }
        }

        let mut mirror = if local_only.is_empty() {
            server
        } else {
            Self::server_ids(client).await?
        };

        let pending = self.pending()?;
        for change in &pending {
            mirror.retain(|id| *id != change.book_id);
            if change.liked {
                mirror.push(change.book_id);
            }
        }

        store::save(self.store.as_ref(), LIKED_BOOKS_KEY, &mirror)?;
        tracing::info!(
            liked = mirror.len(),
            uploaded = local_only.len(),
            pending = pending.len(),
            "Reconciled liked books"
        );
        Ok(mirror)
    }

    /// Ids of the server favorites whose listings still exist.
    async fn server_ids(client: &BazaarClient) -> Result<Vec<BookId>, ClientError> {
        Ok(client
            .favorites()
            .await?
            .into_iter()
            .flatten()
            .map(|b| b.id)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use secrecy::SecretString;
    use serde_json::{Value, json};

    use super::*;
    use crate::mock::{book_json, serve};
    use crate::store::MemoryStore;

    /// In-memory favorites API that can be switched into failure mode.
    #[derive(Clone, Default)]
    struct Favorites {
        ids: Arc<Mutex<Vec<BookId>>>,
        failing: Arc<AtomicBool>,
        interactions: Arc<Mutex<Vec<Value>>>,
    }

    impl Favorites {
        fn failure(&self) -> Option<(StatusCode, Json<Value>)> {
            self.failing.load(Ordering::SeqCst).then(|| {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": "Service unavailable" })),
                )
            })
        }
    }

    async fn add(State(api): State<Favorites>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        if let Some(failure) = api.failure() {
            return failure;
        }
        let id = BookId::parse(body["bookId"].as_str().unwrap()).unwrap();
        let mut ids = api.ids.lock().unwrap();
        if !ids.contains(&id) {
            ids.push(id);
        }
        (StatusCode::OK, Json(json!({ "message": "Added to favorites" })))
    }

    async fn remove(State(api): State<Favorites>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
        if let Some(failure) = api.failure() {
            return failure;
        }
        let id = BookId::parse(&id).unwrap();
        api.ids.lock().unwrap().retain(|existing| *existing != id);
        (StatusCode::OK, Json(json!({ "message": "Removed from favorites" })))
    }

    async fn list(State(api): State<Favorites>) -> (StatusCode, Json<Value>) {
        if let Some(failure) = api.failure() {
            return failure;
        }
        let books: Vec<Value> = api
            .ids
            .lock()
            .unwrap()
            .iter()
            .map(|id| book_json(*id, "Any", 100))
            .collect();
        (StatusCode::OK, Json(json!({ "favorites": books })))
    }

    async fn interaction(State(api): State<Favorites>, Json(body): Json<Value>) -> Json<Value> {
        api.interactions.lock().unwrap().push(body.clone());
        Json(json!({
            "userId": uuid::Uuid::new_v4().to_string(),
            "bookId": body["bookId"],
            "type": body["type"],
            "count": 1,
            "timestamp": "2024-05-01T12:00:00Z",
        }))
    }

    async fn spawn() -> (Favorites, BazaarClient) {
        let api = Favorites::default();
        let app = Router::new()
            .route("/api/favorites", get(list).post(add))
            .route("/api/favorites/{id}", delete(remove))
            .route("/api/interactions", post(interaction))
            .with_state(api.clone());
        let client = BazaarClient::new(&serve(app).await).unwrap();
        (api, client)
    }

    fn likes() -> LikedBooks {
        LikedBooks::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_toggle_signed_out_is_local_only() {
        let (api, client) = spawn().await;
        let likes = likes();
        let id = BookId::generate();

        assert!(likes.toggle(&client, id).await.unwrap());
        assert!(likes.is_liked(id).unwrap());
        assert!(!likes.toggle(&client, id).await.unwrap());
        assert!(!likes.is_liked(id).unwrap());

        assert!(api.ids.lock().unwrap().is_empty());
        assert!(likes.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_syncs_and_records_favorite() {
        let (api, client) = spawn().await;
        let client = client.with_token(SecretString::from("tok"));
        let likes = likes();
        let id = BookId::generate();

        likes.toggle(&client, id).await.unwrap();
        assert_eq!(*api.ids.lock().unwrap(), vec![id]);
        {
            let interactions = api.interactions.lock().unwrap();
            assert_eq!(interactions.len(), 1);
            assert_eq!(interactions[0]["type"], "favorite");
        }

        likes.toggle(&client, id).await.unwrap();
        assert!(api.ids.lock().unwrap().is_empty());
        assert_eq!(api.interactions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_sync_queues_latest_intent() {
        let (api, client) = spawn().await;
        let client = client.with_token(SecretString::from("tok"));
        let likes = likes();
        let id = BookId::generate();

        api.failing.store(true, Ordering::SeqCst);
        assert!(likes.toggle(&client, id).await.unwrap());
        assert!(likes.is_liked(id).unwrap());
        assert!(!likes.toggle(&client, id).await.unwrap());
        assert!(likes.toggle(&client, id).await.unwrap());

        assert_eq!(
            likes.pending().unwrap(),
            vec![PendingFavorite {
                book_id: id,
                liked: true
            }]
        );

        assert_eq!(likes.flush_pending(&client).await.unwrap(), 0);
        assert_eq!(likes.pending().unwrap().len(), 1);

        api.failing.store(false, Ordering::SeqCst);
        assert_eq!(likes.flush_pending(&client).await.unwrap(), 1);
        assert!(likes.pending().unwrap().is_empty());
        assert_eq!(*api.ids.lock().unwrap(), vec![id]);
    }

    #[test]
    fn test_concurrent_local_changes_all_kept() {
        let likes = likes();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let likes = likes.clone();
                scope.spawn(move || {
                    for _ in 0..20 {
                        let id = BookId::generate();
                        assert!(likes.flip(id).unwrap());
                        likes
                            .enqueue(PendingFavorite {
                                book_id: id,
                                liked: true,
                            })
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(likes.ids().unwrap().len(), 160);
        assert_eq!(likes.pending().unwrap().len(), 160);
    }

    #[tokio::test]
    async fn test_flush_needs_sign_in() {
        let (_api, client) = spawn().await;
        assert!(matches!(
            likes().flush_pending(&client).await,
            Err(ClientError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_reconcile_uploads_then_mirrors_server() {
        let (api, client) = spawn().await;
        let likes = likes();
        let on_server = BookId::generate();
        let local = BookId::generate();
        api.ids.lock().unwrap().push(on_server);

        likes.toggle(&client, local).await.unwrap();

        let client = client.with_token(SecretString::from("tok"));
        let mirror = likes.reconcile(&client).await.unwrap();

        assert_eq!(mirror, vec![on_server, local]);
        assert_eq!(likes.ids().unwrap(), mirror);
        assert_eq!(*api.ids.lock().unwrap(), vec![on_server, local]);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_queued_changes() {
        let (api, client) = spawn().await;
        let client = client.with_token(SecretString::from("tok"));
        let likes = likes();
        let server_only = BookId::generate();
        api.ids.lock().unwrap().push(server_only);

        // An unlike that never reached the server wins over the server list.
        api.failing.store(true, Ordering::SeqCst);
        likes.toggle(&client, server_only).await.unwrap();
        likes.toggle(&client, server_only).await.unwrap();
        assert_eq!(
            likes.pending().unwrap(),
            vec![PendingFavorite {
                book_id: server_only,
                liked: false
            }]
        );

        let err = likes.reconcile(&client).await.unwrap_err();
        assert_eq!(err.status(), Some(503));

        api.failing.store(false, Ordering::SeqCst);
        let mirror = likes.reconcile(&client).await.unwrap();
        assert!(mirror.is_empty());
        assert!(api.ids.lock().unwrap().is_empty());
    }
}
