//! Kinds of user/book interactions tracked for recommendations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{BookId, UserId};

/// Error returned for an unknown interaction label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("interaction type must be one of view, click, favorite; got {0:?}")]
pub struct InteractionKindError(pub String);

/// What a user did with a book. One counter row exists per (user, book, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    View,
    Click,
    Favorite,
}

impl InteractionKind {
    /// Database / wire label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Click => "click",
            Self::Favorite => "favorite",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionKind {
    type Err = InteractionKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Self::View),
            "click" => Ok(Self::Click),
            "favorite" => Ok(Self::Favorite),
            other => Err(InteractionKindError(other.to_owned())),
        }
    }
}

/// Per-user counter of one kind of interaction with one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub user_id: UserId,
    pub book_id: BookId,
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    pub count: i32,
    /// When the interaction last happened.
    pub timestamp: DateTime<Utc>,
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for InteractionKind {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for InteractionKind {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let label = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(label.parse()?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for InteractionKind {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_kinds() {
        assert_eq!("view".parse::<InteractionKind>().unwrap(), InteractionKind::View);
        assert_eq!("click".parse::<InteractionKind>().unwrap(), InteractionKind::Click);
        assert_eq!(
            "favorite".parse::<InteractionKind>().unwrap(),
            InteractionKind::Favorite
        );
    }

    #[test]
    fn test_parse_rejects_client_only_kinds() {
        // "like" / "cart" are local UI events, not tracked server-side
        assert!("like".parse::<InteractionKind>().is_err());
        assert!("cart".parse::<InteractionKind>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&InteractionKind::Favorite).unwrap(),
            "\"favorite\""
        );
    }
}
