//! The authenticated caller.

use serde::{Deserialize, Serialize};

use bookbazaar_core::UserId;

/// Identity carried by a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User's id.
    pub id: UserId,
    /// User's email address, as issued.
    pub email: String,
    /// Display name, as issued.
    #[serde(default)]
    pub name: String,
}
