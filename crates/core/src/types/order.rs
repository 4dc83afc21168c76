//! Orders: immutable snapshots of a checked-out cart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BookId, OrderId, Price, UserId};

const fn default_quantity() -> u32 {
    1
}

/// One line of an order, copied from the cart at checkout.
///
/// Clients commonly post whole listing snapshots, so the book reference is
/// also accepted as `_id` or `id`, and unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    #[serde(default, alias = "_id", alias = "id")]
    pub book_id: Option<BookId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: Price,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub image: Option<String>,
}

impl OrderItem {
    /// Price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.price.times(self.quantity)
    }
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user: UserId,
    pub items: Vec<OrderItem>,
    /// The total the buyer submitted; not recomputed from `items`.
    pub total: Price,
    pub ordered_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_item_accepts_listing_snapshot() {
        let book = BookId::generate();
        let item: OrderItem = serde_json::from_value(serde_json::json!({
            "_id": book.to_string(),
            "title": "Dune",
            "price": 150,
            "summary": "ignored",
            "index": 1004,
        }))
        .unwrap();

        assert_eq!(item.book_id, Some(book));
        assert_eq!(item.quantity, 1);
        assert_eq!(item.line_total(), Price::from_units(150));
    }

    #[test]
    fn test_item_book_id_optional() {
        let item: OrderItem =
            serde_json::from_value(serde_json::json!({"title": "Zine", "price": 5, "quantity": 3}))
                .unwrap();
        assert_eq!(item.book_id, None);
        assert_eq!(item.line_total(), Price::from_units(15));
    }
}
