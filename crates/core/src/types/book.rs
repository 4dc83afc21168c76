//! Book listings: the listing record, its condition, and list defaults.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{BookId, Price, UserId};

/// Author list used when a listing names none.
pub const DEFAULT_AUTHOR: &str = "Unknown";

/// Genre list used when a listing names none (also the ML fallback genre).
pub const DEFAULT_GENRE: &str = "General";

/// Error returned for an unknown condition label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("condition must be \"New\" or \"Used\", got {0:?}")]
pub struct ConditionError(pub String);

/// Physical condition of a listed book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Condition {
    New,
    #[default]
    Used,
}

impl Condition {
    /// Database / wire label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Used => "Used",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    /// Accepts the canonical labels case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "used" => Ok(Self::Used),
            _ => Err(ConditionError(s.to_owned())),
        }
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Condition {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Condition {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let label = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(label.parse()?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Condition {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Public seller details attached to a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

/// The seller of a listing: the full profile when one is known, otherwise
/// just the owner's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SellerRef {
    Profile(Seller),
    Id(UserId),
}

impl SellerRef {
    /// The owning user's id, whichever form this is in.
    #[must_use]
    pub const fn id(&self) -> UserId {
        match self {
            Self::Profile(seller) => seller.id,
            Self::Id(id) => *id,
        }
    }
}

impl From<UserId> for SellerRef {
    fn from(id: UserId) -> Self {
        Self::Id(id)
    }
}

/// A book offered for sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: BookId,
    /// Sequential listing number, unique and increasing in creation order.
    pub index: i64,
    pub title: String,
    pub author: Vec<String>,
    pub summary: String,
    pub price: Price,
    pub condition: Condition,
    pub genre: Vec<String>,
    /// Stored upload filename or an absolute URL.
    pub image: Option<String>,
    pub seller: SellerRef,
    /// ML-extracted tags; empty until first requested.
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// Whether `user` listed this book.
    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.seller.id() == user
    }
}

/// Normalize a multi-valued form field into a clean list.
///
/// Each raw value may itself be comma separated (`"Fantasy, Fiction"`).
/// Entries are trimmed, empties dropped, and duplicates removed keeping the
/// first occurrence. Falls back to `[default]` when nothing remains.
#[must_use]
pub fn split_list<I, S>(values: I, default: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for raw in values {
        for part in raw.as_ref().split(',') {
            let part = part.trim();
            if !part.is_empty() && !out.iter().any(|existing| existing == part) {
                out.push(part.to_owned());
            }
        }
    }
    if out.is_empty() {
        out.push(default.to_owned());
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_parse() {
        assert_eq!("New".parse::<Condition>().unwrap(), Condition::New);
        assert_eq!(" used ".parse::<Condition>().unwrap(), Condition::Used);
        assert!("Mint".parse::<Condition>().is_err());
    }

    #[test]
    fn test_condition_default_is_used() {
        assert_eq!(Condition::default(), Condition::Used);
    }

    #[test]
    fn test_condition_serde_labels() {
        assert_eq!(serde_json::to_string(&Condition::New).unwrap(), "\"New\"");
        let c: Condition = serde_json::from_str("\"Used\"").unwrap();
        assert_eq!(c, Condition::Used);
    }

    #[test]
    fn test_split_list_commas_and_repeats() {
        let genres = split_list(["Fantasy, Fiction", "Fiction", " History "], DEFAULT_GENRE);
        assert_eq!(genres, vec!["Fantasy", "Fiction", "History"]);
    }

    #[test]
    fn test_seller_ref_untagged() {
        let id = UserId::generate();
        let bare: SellerRef = serde_json::from_value(serde_json::json!(id.to_string())).unwrap();
        assert_eq!(bare, SellerRef::Id(id));

        let profile: SellerRef = serde_json::from_value(serde_json::json!({
            "id": id.to_string(),
            "name": "Ada",
            "email": "ada@example.com",
        }))
        .unwrap();
        assert!(matches!(profile, SellerRef::Profile(ref s) if s.name == "Ada"));
        assert_eq!(profile.id(), id);
    }

    #[test]
    fn test_book_wire_shape() {
        let seller = UserId::generate();
        let book = Book {
            id: BookId::generate(),
            index: 1000,
            title: "Dune".to_owned(),
            author: vec!["Frank Herbert".to_owned()],
            summary: "Spice.".to_owned(),
            price: Price::from_units(150),
            condition: Condition::Used,
            genre: vec!["Fiction".to_owned()],
            image: None,
            seller: seller.into(),
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(&book).unwrap();
        assert_eq!(json["price"], serde_json::json!(150.0));
        assert_eq!(json["seller"], serde_json::json!(seller.to_string()));
        assert!(json.get("createdAt").is_some());
        assert!(book.is_owned_by(seller));
        assert!(!book.is_owned_by(UserId::generate()));
    }

    #[test]
    fn test_split_list_default() {
        let empty: [&str; 0] = [];
        assert_eq!(split_list(empty, DEFAULT_AUTHOR), vec!["Unknown"]);
        assert_eq!(split_list([" , "], DEFAULT_GENRE), vec!["General"]);
    }
}
