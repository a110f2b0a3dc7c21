//! Signed opaque session tokens.
//!
//! A token is the base64url encoding of 32 random id bytes followed by the
//! HMAC-SHA256 of those bytes under the gateway's signing key:
//!
//! ```text
//! +------------------------------+---------------------------------+
//! |  32 bytes from the OS CSPRNG |  HMAC-SHA256(id, key), 32 bytes |
//! +------------------------------+---------------------------------+
//! ```
//!
//! Validity can be checked without touching the session store; the store is
//! only consulted for the payload.

use std::fmt;

use axum::extract::Query;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Uri};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of the random id portion.
pub const ID_LENGTH: usize = 32;

/// Length of the decoded token (id plus signature).
pub const SIGNED_LENGTH: usize = ID_LENGTH + 32;

/// Query parameter used when a client cannot set headers (WebSocket upgrades).
pub const AUTH_PARAM: &str = "auth";

const SCHEME_BEARER: &str = "Bearer";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("signing key must not be empty")]
    EmptyKey,
    #[error("secure random generation failed")]
    Randomness,
    #[error("malformed session token")]
    Malformed,
    #[error("session token signature mismatch")]
    InvalidSignature,
    #[error("no session token in Authorization header or auth parameter")]
    MissingToken,
    #[error("authorization scheme not supported")]
    AmbiguousScheme,
    #[error("more than one auth parameter supplied")]
    MultipleValues,
}

/// A session token whose signature has been created or verified with the
/// gateway's key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Value for an `Authorization` header carrying this token.
    pub fn bearer(&self) -> String {
        format!("{SCHEME_BEARER} {}", self.0)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sign(id: &[u8], signing_key: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(signing_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(id);
    mac
}

/// Create a new signed token.
pub fn create(signing_key: &str) -> Result<SessionToken, TokenError> {
    if signing_key.is_empty() {
        return Err(TokenError::EmptyKey);
    }

    let mut buf = [0u8; SIGNED_LENGTH];
    rand::rngs::OsRng
        .try_fill_bytes(&mut buf[..ID_LENGTH])
        .map_err(|e| {
            tracing::error!(?e, "OS randomness unavailable");
            TokenError::Randomness
        })?;

    let signature = sign(&buf[..ID_LENGTH], signing_key).finalize().into_bytes();
    buf[ID_LENGTH..].copy_from_slice(&signature);

    Ok(SessionToken(URL_SAFE.encode(buf)))
}

/// Verify a token string against `signing_key`.
///
/// The signature comparison is constant-time.
pub fn validate(token: &str, signing_key: &str) -> Result<SessionToken, TokenError> {
    let decoded = URL_SAFE.decode(token).map_err(|_| TokenError::Malformed)?;
    if decoded.len() <= ID_LENGTH {
        return Err(TokenError::Malformed);
    }

    let (id, claimed) = decoded.split_at(ID_LENGTH);
    sign(id, signing_key)
        .verify_slice(claimed)
        .map_err(|_| TokenError::InvalidSignature)?;

    Ok(SessionToken(token.to_string()))
}

/// Pull the raw (unvalidated) token out of a request.
///
/// The `Authorization: Bearer <token>` header wins; without it a single `auth`
/// query parameter is used.
pub fn extract_from_request(headers: &HeaderMap, uri: &Uri) -> Result<String, TokenError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().map_err(|_| TokenError::AmbiguousScheme)?;
        return parse_bearer(value);
    }
    extract_from_auth_param(uri)
}

/// Read the token from the `auth` query parameter only. A value containing
/// whitespace must be in `Bearer <token>` form.
pub fn extract_from_auth_param(uri: &Uri) -> Result<String, TokenError> {
    let values = auth_param_values(uri);
    match values.as_slice() {
        [] => Err(TokenError::MissingToken),
        [value] => {
            let value = value.trim();
            if value.is_empty() {
                Err(TokenError::MissingToken)
            } else if value.contains(char::is_whitespace) {
                parse_bearer(value)
            } else {
                Ok(value.to_string())
            }
        }
        _ => Err(TokenError::MultipleValues),
    }
}

/// All values of the `auth` query parameter, percent-decoded.
pub fn auth_param_values(uri: &Uri) -> Vec<String> {
    Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map(|Query(pairs)| {
            pairs
                .into_iter()
                .filter(|(k, _)| k == AUTH_PARAM)
                .map(|(_, v)| v)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_bearer(value: &str) -> Result<String, TokenError> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    match parts.as_slice() {
        [scheme, token] if *scheme == SCHEME_BEARER => Ok((*token).to_string()),
        _ => Err(TokenError::AmbiguousScheme),
    }
}
