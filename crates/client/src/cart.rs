//! Shopping cart of listing snapshots.
//!
//! The cart keeps whole listings as they looked when added, so it renders
//! without the API. Each listing appears at most once.

use std::sync::Arc;

use bookbazaar_core::{Book, BookId, Order, OrderItem, Price};
use tracing::instrument;

use crate::api::BazaarClient;
use crate::error::ClientError;
use crate::store::{self, CART_KEY, LocalStore, StoreError};

/// Cart state over a [`LocalStore`].
#[derive(Clone)]
pub struct Cart {
    store: Arc<dyn LocalStore>,
}

impl Cart {
    #[must_use]
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Listings in the order they were added.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn items(&self) -> Result<Vec<Book>, StoreError> {
        store::load(self.store.as_ref(), CART_KEY)
    }

    /// Whether `id` is in the cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn contains(&self, id: BookId) -> Result<bool, StoreError> {
        Ok(self.items()?.iter().any(|b| b.id == id))
    }

    /// Add a listing. Returns `false`, leaving the cart unchanged, when the
    /// listing is already in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn add(&self, book: &Book) -> Result<bool, StoreError> {
        let added = store::modify(self.store.as_ref(), CART_KEY, |items: &mut Vec<Book>| {
            if items.iter().any(|b| b.id == book.id) {
                return false;
            }
            items.push(book.clone());
            true
        })?;
        if added {
            tracing::debug!(book_id = %book.id, "Added to cart");
        }
        Ok(added)
    }

    /// Remove a listing. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn remove(&self, id: BookId) -> Result<bool, StoreError> {
        store::modify(self.store.as_ref(), CART_KEY, |items: &mut Vec<Book>| {
            let before = items.len();
            items.retain(|b| b.id != id);
            items.len() != before
        })
    }

    /// Sum of the listed prices.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn total(&self) -> Result<Price, StoreError> {
        Ok(self.items()?.iter().map(|b| b.price).sum())
    }

    /// Order lines for the current contents, one copy of each listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn order_items(&self) -> Result<Vec<OrderItem>, StoreError> {
        Ok(self
            .items()?
            .into_iter()
            .map(|b| OrderItem {
                book_id: Some(b.id),
                title: b.title,
                price: b.price,
                quantity: 1,
                image: b.image,
            })
            .collect())
    }

    /// Empty the cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(CART_KEY)
    }

    /// Place an order for the cart and empty it once the API accepts it.
    ///
    /// A failed order leaves the cart as it was.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::EmptyCart`] for an empty cart, or the API or
    /// store error.
    #[instrument(skip_all)]
    pub async fn checkout(&self, client: &BazaarClient) -> Result<Order, ClientError> {
        let items = self.order_items()?;
        if items.is_empty() {
            return Err(ClientError::EmptyCart);
        }
        let total: Price = items.iter().map(OrderItem::line_total).sum();

        let order = client.place_order(&items, total).await?;
        self.clear()?;
        tracing::info!(order_id = %order.id, total = %order.total, "Order placed");
        Ok(order)
    }
}
