//! Bearer token verification.
//!
//! Tokens are compact HS256 JWTs signed with the shared secret
//! (`BAZAAR_JWT_SECRET`). Issuing tokens (register/login) happens elsewhere;
//! this service only verifies them, plus a `sign` helper used by tooling and
//! tests to mint tokens the same way the issuer does.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use bookbazaar_core::UserId;

use crate::models::CurrentUser;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur while verifying a bearer token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer token on the request.
    #[error("Not authorized, token missing")]
    Missing,

    /// Token is not a well-formed JWT.
    #[error("Not authorized, token invalid")]
    Malformed,

    /// Signature does not match.
    #[error("Not authorized, token invalid")]
    InvalidSignature,

    /// Header names an algorithm other than HS256.
    #[error("Not authorized, token invalid")]
    UnsupportedAlgorithm,

    /// `exp` is in the past.
    #[error("Token expired")]
    Expired,
}

/// Claims carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub name: String,
    /// Expiry as seconds since the Unix epoch. Tokens without it do not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl From<TokenClaims> for CurrentUser {
    fn from(claims: TokenClaims) -> Self {
        Self {
            id: claims.id,
            email: claims.email,
            name: claims.name,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Verifies (and, for tooling, signs) HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: SecretString,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl TokenVerifier {
    /// Create a verifier for the given shared secret.
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| AuthError::InvalidSignature)
    }

    /// Verify a token against the current time.
    ///
    /// # Errors
    ///
    /// Returns an `AuthError` if the token is malformed, badly signed, uses
    /// another algorithm, or has expired.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    /// Verify a token as of `now` (seconds since the Unix epoch).
    ///
    /// # Errors
    ///
    /// See [`TokenVerifier::verify`].
    pub fn verify_at(&self, token: &str, now: i64) -> Result<TokenClaims, AuthError> {
        let (signing_input, signature) = token.trim().rsplit_once('.').ok_or(AuthError::Malformed)?;
        let (header, payload) = signing_input.split_once('.').ok_or(AuthError::Malformed)?;
        if payload.contains('.') {
            return Err(AuthError::Malformed);
        }

        let header: Header = decode_segment(header)?;
        if header.alg != "HS256" {
            return Err(AuthError::UnsupportedAlgorithm);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidSignature)?;

        let claims: TokenClaims = decode_segment(payload)?;
        if claims.exp.is_some_and(|exp| exp <= now) {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }

    /// Sign claims into a compact token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Malformed` if the claims cannot be serialized.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        let header = Header {
            alg: "HS256".to_owned(),
            typ: Some("JWT".to_owned()),
        };
        let header = serde_json::to_vec(&header).map_err(|_| AuthError::Malformed)?;
        let payload = serde_json::to_vec(claims).map_err(|_| AuthError::Malformed)?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed)
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// # Errors
///
/// Returns `AuthError::Missing` if the value has no token.
pub fn bearer_token(header_value: &str) -> Result<&str, AuthError> {
    let (scheme, token) = header_value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::Missing)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(AuthError::Missing);
    }
    Ok(token.trim())
}
