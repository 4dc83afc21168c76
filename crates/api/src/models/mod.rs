//! Request-side domain models for the API.
//!
//! Records returned to clients (`Book`, `Order`, ...) live in
//! `bookbazaar_core`; these types cover the authenticated caller and listing
//! input validation.

pub mod listing;
pub mod user;

pub use listing::{ListingChanges, ListingError, ListingForm, NewListing};
pub use user::CurrentUser;
