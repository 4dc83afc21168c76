//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types. Every id is a UUID on
//! the wire and in the database; [`IdError`] is what "not a well-formed
//! identifier" means everywhere in the API.

use thiserror::Error;

/// Error returned when a string is not a well-formed identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {kind} id: {value:?}")]
pub struct IdError {
    /// Entity kind the id was parsed for (e.g. "book").
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Macro to define a type-safe ID wrapper.
///
/// Creates a newtype wrapper around `uuid::Uuid` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`
/// - Conversion methods: `new()`, `generate()`, `as_uuid()`, `parse()`
/// - `From<Uuid>`, `Into<Uuid>` and `FromStr` implementations
/// - `sqlx` `Type`, `Encode`, and `Decode` implementations (with `postgres` feature)
///
/// # Example
///
/// ```rust
/// # use bookbazaar_core::define_id;
/// define_id!(ShelfId, "shelf");
/// define_id!(AisleId, "aisle");
///
/// let _shelf = ShelfId::parse("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
/// assert!(AisleId::parse("not-an-id").is_err());
///
/// // These are different types, so this won't compile:
/// // let _: AisleId = _shelf;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $kind:literal) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Wrap an existing UUID.
            #[must_use]
            pub const fn new(id: ::uuid::Uuid) -> Self {
                Self(id)
            }

            /// Generate a fresh random (v4) id.
            #[must_use]
            pub fn generate() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> ::uuid::Uuid {
                self.0
            }

            /// Parse an id from its textual form.
            ///
            /// # Errors
            ///
            /// Returns [`IdError`](crate::IdError) if the input is not a
            /// well-formed UUID.
            pub fn parse(s: &str) -> ::core::result::Result<Self, $crate::IdError> {
                ::uuid::Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| $crate::IdError {
                        kind: $kind,
                        value: s.to_owned(),
                    })
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<::uuid::Uuid> for $name {
            fn from(id: ::uuid::Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for ::uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <::uuid::Uuid as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <::uuid::Uuid as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        #[cfg(feature = "postgres")]
        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(
                value: ::sqlx::postgres::PgValueRef<'r>,
            ) -> ::core::result::Result<Self, ::sqlx::error::BoxDynError> {
                let id = <::uuid::Uuid as ::sqlx::Decode<::sqlx::Postgres>>::decode(value)?;
                Ok(Self(id))
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Encode<'_, ::sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut ::sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
                <::uuid::Uuid as ::sqlx::Encode<::sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

define_id!(BookId, "book");
define_id!(UserId, "user");
define_id!(OrderId, "order");

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "67e55044-10b1-426f-9247-bb680e5fe0c8";

    #[test]
    fn test_parse_valid() {
        let id = BookId::parse(SAMPLE).unwrap();
        assert_eq!(id.to_string(), SAMPLE);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let id = BookId::parse(&format!("  {SAMPLE} ")).unwrap();
        assert_eq!(id.to_string(), SAMPLE);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = BookId::parse("64b7f0c2e1").unwrap_err();
        assert_eq!(err.kind, "book");
        assert_eq!(err.value, "64b7f0c2e1");
        assert!(UserId::parse("").is_err());
    }

    #[test]
    fn test_error_display_names_kind() {
        let err = UserId::parse("nope").unwrap_err();
        assert_eq!(err.to_string(), "malformed user id: \"nope\"");
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(OrderId::generate(), OrderId::generate());
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = BookId::parse(SAMPLE).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{SAMPLE}\""));
        let back: BookId = serde_json::from_str(&format!("\"{SAMPLE}\"")).unwrap();
        assert_eq!(back, id);
    }
}
