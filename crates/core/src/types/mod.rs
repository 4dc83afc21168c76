//! Core types for BookBazaar.
//!
//! This module provides type-safe wrappers for common domain concepts and the
//! records exchanged over the API.

pub mod book;
pub mod email;
pub mod id;
pub mod interaction;
pub mod order;
pub mod pagination;
pub mod price;

pub use book::{
    Book, Condition, ConditionError, DEFAULT_AUTHOR, DEFAULT_GENRE, Seller, SellerRef, split_list,
};
pub use email::{Email, EmailError};
pub use id::*;
pub use interaction::{Interaction, InteractionKind, InteractionKindError};
pub use order::{Order, OrderItem};
pub use pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, PageSlice, Pagination};
pub use price::{Price, PriceError};
