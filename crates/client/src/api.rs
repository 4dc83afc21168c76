//! Typed HTTP client for the BookBazaar REST API.

use std::sync::Arc;
use std::time::Duration;

use bookbazaar_core::{
    Book, BookId, Condition, Interaction, InteractionKind, Order, OrderItem, PageSlice, Price,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;
use url::Url;

use crate::error::ClientError;

/// Request timeout applied to every call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest slice of an unparseable body kept in an error message.
const ERROR_BODY_PREVIEW: usize = 200;

// =============================================================================
// Request / response shapes
// =============================================================================

/// Catalog search parameters for `GET /api/books/all`. Unset fields are not
/// sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookQuery {
    pub search: Option<String>,
    pub genre: Option<String>,
    pub condition: Option<Condition>,
    pub min_price: Option<Price>,
    pub max_price: Option<Price>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl BookQuery {
    fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        if let Some(search) = &self.search {
            pairs.append_pair("search", search);
        }
        if let Some(genre) = &self.genre {
            pairs.append_pair("genre", genre);
        }
        if let Some(condition) = self.condition {
            pairs.append_pair("condition", condition.as_str());
        }
        if let Some(min) = self.min_price {
            pairs.append_pair("minPrice", &min.to_string());
        }
        if let Some(max) = self.max_price {
            pairs.append_pair("maxPrice", &max.to_string());
        }
        if let Some(page) = self.page {
            pairs.append_pair("page", &page.to_string());
        }
        if let Some(limit) = self.limit {
            pairs.append_pair("limit", &limit.to_string());
        }
    }
}

/// An image file attached to a listing form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Fields of a listing create or update form.
///
/// Creating needs `title`, `summary` and `price`; on update every unset
/// field keeps its stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFields {
    pub title: Option<String>,
    pub author: Vec<String>,
    pub summary: Option<String>,
    pub price: Option<Price>,
    pub condition: Option<Condition>,
    pub genre: Vec<String>,
    pub image: Option<ImageUpload>,
    /// Remote image URL, used when no file is uploaded.
    pub image_url: Option<String>,
}

impl ListingFields {
    fn into_form(self) -> Form {
        let mut form = Form::new();
        if let Some(title) = self.title {
            form = form.text("title", title);
        }
        for author in self.author {
            form = form.text("author", author);
        }
        if let Some(summary) = self.summary {
            form = form.text("summary", summary);
        }
        if let Some(price) = self.price {
            form = form.text("price", price.to_string());
        }
        if let Some(condition) = self.condition {
            form = form.text("condition", condition.as_str());
        }
        for genre in self.genre {
            form = form.text("genre", genre);
        }
        match (self.image, self.image_url) {
            (Some(upload), _) => {
                form = form.part("image", Part::bytes(upload.bytes).file_name(upload.file_name));
            }
            (None, Some(url)) => form = form.text("image", url),
            (None, None) => {}
        }
        form
    }
}

/// Buyer-to-seller message for `POST /api/contact`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactForm {
    pub seller_email: String,
    pub buyer_name: String,
    pub buyer_email: String,
    pub message: String,
}

/// Tags returned by `POST /api/ml/extract-tags`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookTags {
    pub tags: Vec<String>,
    /// Served from the listing instead of the ML service.
    #[serde(default)]
    pub cached: bool,
    /// Placeholder tags returned while the ML routes are rate limited.
    #[serde(skip)]
    pub fallback: bool,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(alias = "books", alias = "favorites", alias = "book", alias = "suggestions")]
    value: T,
}

#[derive(Deserialize)]
struct GenreResponse {
    predicted_genre: Vec<String>,
}

#[derive(Deserialize)]
struct FallbackTags {
    #[serde(default)]
    tags: Vec<String>,
}

// =============================================================================
// BazaarClient
// =============================================================================

/// Client for the BookBazaar API.
///
/// Cheap to clone; clones share one connection pool. Routes that need a
/// signed-in user fail with [`ClientError::NotSignedIn`] before any request
/// is sent when no bearer token is set.
#[derive(Clone)]
pub struct BazaarClient {
    inner: Arc<BazaarClientInner>,
    token: Option<SecretString>,
}

struct BazaarClientInner {
    http: reqwest::Client,
    base_url: Url,
}

impl std::fmt::Debug for BazaarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BazaarClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("signed_in", &self.token.is_some())
            .finish()
    }
}

impl BazaarClient {
    /// Create an anonymous client for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// built.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            inner: Arc::new(BazaarClientInner {
                http,
                base_url: Url::parse(base_url)?,
            }),
            token: None,
        })
    }

    /// A copy of this client that authenticates with `token`.
    #[must_use]
    pub fn with_token(&self, token: SecretString) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            token: Some(token),
        }
    }

    /// A copy of this client without credentials.
    #[must_use]
    pub fn anonymous(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            token: None,
        }
    }

    /// Whether a bearer token is set.
    #[must_use]
    pub const fn is_signed_in(&self) -> bool {
        self.token.is_some()
    }

    /// The API origin this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Public URL of a listing image: stored uploads are served under
    /// `/uploads`, absolute URLs are returned unchanged.
    #[must_use]
    pub fn image_url(&self, image: &str) -> Option<Url> {
        if image.starts_with("http://") || image.starts_with("https://") {
            return Url::parse(image).ok();
        }
        if image.is_empty() || image.contains('/') {
            return None;
        }
        self.url(&format!("/uploads/{image}")).ok()
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.inner.base_url.join(path)?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.inner.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        if self.token.is_none() {
            return Err(ClientError::NotSignedIn);
        }
        Ok(self.request(method, self.url(path)?))
    }

    fn public(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        Ok(self.request(method, self.url(path)?))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        let body = Self::success_body(response).await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %preview(&body),
                "Failed to parse BookBazaar API response"
            );
            ClientError::Parse(e.to_string())
        })
    }

    async fn success_body(response: Response) -> Result<String, ClientError> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(body);
        }

        let message = error_message(&body);
        tracing::debug!(status = %status, message = %message, "BookBazaar API returned an error");

        Err(match status {
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized(message),
            StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited(message),
            _ => ClientError::Api {
                status: status.as_u16(),
                message,
            },
        })
    }

    // -------------------------------------------------------------------------
    // Health
    // -------------------------------------------------------------------------

    /// Whether the API and its database are ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the API cannot be reached.
    pub async fn ready(&self) -> Result<bool, ClientError> {
        let response = self.public(Method::GET, "/health/ready")?.send().await?;
        Ok(response.status().is_success())
    }

    // -------------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------------

    /// Search the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the API rejects the filters.
    #[instrument(skip(self))]
    pub async fn search_books(&self, query: &BookQuery) -> Result<PageSlice<Book>, ClientError> {
        let mut url = self.url("/api/books/all")?;
        query.apply(&mut url);
        Self::send(self.request(Method::GET, url)).await
    }

    /// Fetch one listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the listing does not exist.
    #[instrument(skip(self), fields(book_id = %id))]
    pub async fn book(&self, id: BookId) -> Result<Book, ClientError> {
        Self::send(self.public(Method::GET, &format!("/api/books/{id}"))?).await
    }

    /// Fetch the listings with the given ids; unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn books_by_ids(&self, ids: &[BookId]) -> Result<Vec<Book>, ClientError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        let mut url = self.url("/api/books/by-ids")?;
        url.query_pairs_mut().append_pair("ids", &joined);
        Self::send(self.request(Method::GET, url)).await
    }

    /// Listings tagged with `genre`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self))]
    pub async fn books_by_genre(&self, genre: &str) -> Result<Vec<Book>, ClientError> {
        let mut url = self.url("/api/books/genre")?;
        url.query_pairs_mut().append_pair("genre", genre);
        let envelope: Envelope<Vec<Book>> = Self::send(self.request(Method::GET, url)).await?;
        Ok(envelope.value)
    }

    /// Listings owned by the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in or the request fails.
    #[instrument(skip(self))]
    pub async fn my_books(&self) -> Result<Vec<Book>, ClientError> {
        Self::send(self.authed(Method::GET, "/api/books/my-books")?).await
    }

    /// List a book for sale.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in, the form is incomplete, or the
    /// request fails.
    #[instrument(skip_all)]
    pub async fn create_book(&self, listing: ListingFields) -> Result<Book, ClientError> {
        let request = self
            .authed(Method::POST, "/api/books/add")?
            .multipart(listing.into_form());
        let envelope: Envelope<Book> = Self::send(request).await?;
        Ok(envelope.value)
    }

    /// Edit a listing the signed-in user owns.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in, not the owner, or the request
    /// fails.
    #[instrument(skip(self, listing), fields(book_id = %id))]
    pub async fn update_book(&self, id: BookId, listing: ListingFields) -> Result<Book, ClientError> {
        let request = self
            .authed(Method::PUT, &format!("/api/books/{id}"))?
            .multipart(listing.into_form());
        let envelope: Envelope<Book> = Self::send(request).await?;
        Ok(envelope.value)
    }

    /// Delete a listing the signed-in user owns.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in, not the owner, or the request
    /// fails.
    #[instrument(skip(self), fields(book_id = %id))]
    pub async fn delete_book(&self, id: BookId) -> Result<(), ClientError> {
        let _: Value = Self::send(self.authed(Method::DELETE, &format!("/api/books/{id}"))?).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Place an order for `items` with the buyer-computed `total`.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in, the order is rejected, or the
    /// request fails.
    #[instrument(skip(self, items), fields(items = items.len(), total = %total))]
    pub async fn place_order(&self, items: &[OrderItem], total: Price) -> Result<Order, ClientError> {
        let request = self
            .authed(Method::POST, "/api/orders")?
            .json(&json!({ "items": items, "total": total }));
        Self::send(request).await
    }

    /// The signed-in user's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in or the request fails.
    #[instrument(skip(self))]
    pub async fn orders(&self) -> Result<Vec<Order>, ClientError> {
        Self::send(self.authed(Method::GET, "/api/orders")?).await
    }

    // -------------------------------------------------------------------------
    // Favorites
    // -------------------------------------------------------------------------

    /// Add a favorite. Adding one twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in or the request fails.
    #[instrument(skip(self), fields(book_id = %id))]
    pub async fn add_favorite(&self, id: BookId) -> Result<(), ClientError> {
        let request = self
            .authed(Method::POST, "/api/favorites")?
            .json(&json!({ "bookId": id }));
        let _: Value = Self::send(request).await?;
        Ok(())
    }

    /// Remove a favorite. Removing an absent one is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in or the request fails.
    #[instrument(skip(self), fields(book_id = %id))]
    pub async fn remove_favorite(&self, id: BookId) -> Result<(), ClientError> {
        let _: Value =
            Self::send(self.authed(Method::DELETE, &format!("/api/favorites/{id}"))?).await?;
        Ok(())
    }

    /// The signed-in user's favorites; `None` marks a listing that was
    /// deleted after being favorited.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in or the request fails.
    #[instrument(skip(self))]
    pub async fn favorites(&self) -> Result<Vec<Option<Book>>, ClientError> {
        let envelope: Envelope<Vec<Option<Book>>> =
            Self::send(self.authed(Method::GET, "/api/favorites")?).await?;
        Ok(envelope.value)
    }

    // -------------------------------------------------------------------------
    // Interactions
    // -------------------------------------------------------------------------

    /// Count one interaction with a book.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in or the request fails.
    #[instrument(skip(self), fields(book_id = %id, kind = %kind))]
    pub async fn record_interaction(
        &self,
        id: BookId,
        kind: InteractionKind,
    ) -> Result<Interaction, ClientError> {
        let request = self
            .authed(Method::POST, "/api/interactions")?
            .json(&json!({ "bookId": id, "type": kind }));
        Self::send(request).await
    }

    /// The signed-in user's interaction counters.
    ///
    /// # Errors
    ///
    /// Returns an error if not signed in or the request fails.
    #[instrument(skip(self))]
    pub async fn interactions(&self) -> Result<Vec<Interaction>, ClientError> {
        Self::send(self.authed(Method::GET, "/api/interactions")?).await
    }

    // -------------------------------------------------------------------------
    // ML
    // -------------------------------------------------------------------------

    /// Suggest genres for a summary.
    ///
    /// While the API is rate limited this resolves to the fallback genre
    /// rather than an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary is blank or the request fails.
    #[instrument(skip_all)]
    pub async fn predict_genre(&self, summary: &str) -> Result<Vec<String>, ClientError> {
        let request = self
            .public(Method::POST, "/api/ml/predict-genre")?
            .json(&json!({ "summary": summary }));
        let response: GenreResponse = Self::send(request).await?;
        Ok(response.predicted_genre)
    }

    /// Tags for a listing, extracted on first request and cached after.
    ///
    /// A rate-limited call resolves to the placeholder tags in the response
    /// body with `fallback` set.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing does not exist or the request fails.
    #[instrument(skip(self), fields(book_id = %id))]
    pub async fn extract_tags(&self, id: BookId) -> Result<BookTags, ClientError> {
        let response = self
            .public(Method::POST, "/api/ml/extract-tags")?
            .json(&json!({ "bookId": id }))
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await?;
            if let Ok(fallback) = serde_json::from_str::<FallbackTags>(&body)
                && !fallback.tags.is_empty()
            {
                tracing::warn!(book_id = %id, "Tag extraction rate limited, using fallback tags");
                return Ok(BookTags {
                    tags: fallback.tags,
                    cached: false,
                    fallback: true,
                });
            }
            return Err(ClientError::RateLimited(error_message(&body)));
        }

        let body = Self::success_body(response).await?;
        serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))
    }

    /// Search-box suggestions for a partial query.
    ///
    /// # Errors
    ///
    /// Returns an error if the query is blank or the request fails.
    #[instrument(skip(self))]
    pub async fn autocomplete(&self, query: &str) -> Result<Vec<String>, ClientError> {
        let mut url = self.url("/api/ml/autocomplete")?;
        url.query_pairs_mut().append_pair("query", query);
        let envelope: Envelope<Vec<String>> = Self::send(self.request(Method::GET, url)).await?;
        Ok(envelope.value)
    }

    // -------------------------------------------------------------------------
    // Contact
    // -------------------------------------------------------------------------

    /// Relay a message to a listing's seller.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing, mail delivery fails, or the
    /// request fails.
    #[instrument(skip_all)]
    pub async fn contact_seller(&self, form: &ContactForm) -> Result<(), ClientError> {
        let request = self.public(Method::POST, "/api/contact")?.json(form);
        let _: Value = Self::send(request).await?;
        Ok(())
    }
}

fn preview(body: &str) -> String {
    body.chars().take(ERROR_BODY_PREVIEW).collect()
}

/// The `error` field of an error body, or a preview of the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| preview(body))
}
