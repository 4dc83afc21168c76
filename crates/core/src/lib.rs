//! BookBazaar Core - Shared domain types.
//!
//! This crate provides the types shared by every BookBazaar component:
//! - `api` - REST API server (catalog, orders, favorites, ML proxy, contact)
//! - `client` - Client library holding local cart/favorites state
//! - `cli` - Command-line tools for migrations, seeding and browsing
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Database encoding is behind the `postgres` feature.
//!
//! # Modules
//!
//! - [`types`] - Typed ids, emails, prices, book conditions, interaction kinds
//!   and pagination math

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
