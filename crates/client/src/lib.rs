//! BookBazaar client library.
//!
//! Wraps the REST API in a typed [`BazaarClient`] and keeps the state a
//! shopper's device owns between sessions: the cart, recently viewed books,
//! liked books (mirrored to server favorites once signed in) and a memoized,
//! debounced autocomplete. State lives in any [`LocalStore`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod autocomplete;
pub mod cart;
pub mod error;
pub mod history;
pub mod likes;
pub mod store;

pub use api::{BazaarClient, BookQuery, BookTags, ContactForm, ImageUpload, ListingFields};
pub use autocomplete::{Autocomplete, DEFAULT_DEBOUNCE, SuggestionSource};
pub use cart::Cart;
pub use error::ClientError;
pub use history::{MAX_RECENTLY_VIEWED, RecentlyViewed};
pub use likes::{LikedBooks, PendingFavorite};
pub use store::{FileStore, LocalStore, MemoryStore, StoreError};
