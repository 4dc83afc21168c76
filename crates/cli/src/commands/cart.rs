//! Local cart kept in a state file.
//!
//! The state file is the same JSON key-value layout the client library uses,
//! so recently viewed and liked books written by other tools live alongside
//! the cart.

use std::path::Path;
use std::sync::Arc;

use bookbazaar_client::{BazaarClient, Cart, FileStore};
use bookbazaar_core::BookId;
use secrecy::SecretString;

use super::browse::format_book;

/// A cart bound to a state file and an API.
pub struct Session {
    client: BazaarClient,
    cart: Cart,
}

impl Session {
    /// Open the state file and prepare a client, signed in when
    /// `BAZAAR_TOKEN` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file is unreadable or the URL invalid.
    pub fn open(api_url: &str, state: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let store = FileStore::open(state)?;
        let mut client = BazaarClient::new(api_url)?;
        if let Ok(token) = std::env::var("BAZAAR_TOKEN") {
            client = client.with_token(SecretString::from(token));
        }

        Ok(Self {
            client,
            cart: Cart::new(Arc::new(store)),
        })
    }

    /// Print the cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read.
    pub fn list(&self) -> Result<(), Box<dyn std::error::Error>> {
        let items = self.cart.items()?;
        let total = self.cart.total()?;

        #[allow(clippy::print_stdout)]
        {
            if items.is_empty() {
                println!("Your cart is empty.");
                return Ok(());
            }
            for book in &items {
                println!("{}", format_book(book));
            }
            println!("{} item(s), total ₹{total}", items.len());
        }
        Ok(())
    }

    /// Fetch a listing and add it to the cart.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed id, an unknown listing, or a state
    /// file failure.
    pub async fn add(&self, id: &str) -> Result<(), Box<dyn std::error::Error>> {
        let id = BookId::parse(id)?;
        let book = self.client.book(id).await?;

        if self.cart.add(&book)? {
            tracing::info!(title = %book.title, "Added to cart");
        } else {
            tracing::info!(title = %book.title, "Already in cart");
        }
        Ok(())
    }

    /// Remove a listing from the cart.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed id or a state file failure.
    pub fn remove(&self, id: &str) -> Result<(), Box<dyn std::error::Error>> {
        let id = BookId::parse(id)?;
        if self.cart.remove(id)? {
            tracing::info!(book_id = %id, "Removed from cart");
        } else {
            tracing::warn!(book_id = %id, "Not in cart");
        }
        Ok(())
    }

    /// Order everything in the cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart is empty, `BAZAAR_TOKEN` is missing or
    /// rejected, or the order fails.
    pub async fn checkout(&self) -> Result<(), Box<dyn std::error::Error>> {
        let order = self.cart.checkout(&self.client).await?;
        tracing::info!(order_id = %order.id, items = order.items.len(), total = %order.total, "Order placed");
        Ok(())
    }
}
