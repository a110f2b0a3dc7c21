//! Session payloads keyed by signed tokens, with sliding expiry.

use std::sync::Arc;

use axum::http::{HeaderMap, Uri};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::token::{self, SessionToken, TokenError};
use crate::db::kv::{KeyValueStore, KvError};
use crate::models::user::UserProfile;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("session not found or expired")]
    NotFound,
    #[error("stored session could not be decoded: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("session could not be encoded: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error(transparent)]
    Store(#[from] KvError),
}

/// Payload stored for every signed-in client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub started_at: DateTime<Utc>,
    pub user: UserProfile,
}

impl SessionState {
    pub fn new(user: UserProfile) -> Self {
        Self {
            started_at: Utc::now(),
            user,
        }
    }
}

/// Session store over the shared key-value service.
///
/// Every successful read pushes the expiry out by the full TTL, so a session
/// only lapses after `ttl_secs` without use.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    ttl_secs: u64,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl_secs: u64) -> Self {
        Self { kv, ttl_secs }
    }

    fn key(token: &SessionToken) -> String {
        format!("sid:{}", token.as_str())
    }

    pub async fn save<T: Serialize + Sync>(
        &self,
        token: &SessionToken,
        state: &T,
    ) -> Result<(), SessionError> {
        let value = serde_json::to_string(state).map_err(SessionError::Serialize)?;
        self.kv.set_ex(&Self::key(token), &value, self.ttl_secs).await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, token: &SessionToken) -> Result<T, SessionError> {
        let value = self
            .kv
            .get_refresh(&Self::key(token), self.ttl_secs)
            .await?
            .ok_or(SessionError::NotFound)?;
        serde_json::from_str(&value).map_err(SessionError::Deserialize)
    }

    pub async fn delete(&self, token: &SessionToken) -> Result<(), SessionError> {
        self.kv.del(&Self::key(token)).await?;
        Ok(())
    }
}

/// Create a token, store `state` under it and return the token for the
/// `Authorization` response header.
pub async fn begin_session<T: Serialize + Sync>(
    signing_key: &str,
    store: &SessionStore,
    state: &T,
) -> Result<SessionToken, SessionError> {
    let token = token::create(signing_key)?;
    store.save(&token, state).await?;
    Ok(token)
}

/// Extract and validate the request's token without loading its payload.
pub fn session_token(
    headers: &HeaderMap,
    uri: &Uri,
    signing_key: &str,
) -> Result<SessionToken, SessionError> {
    let raw = token::extract_from_request(headers, uri)?;
    Ok(token::validate(&raw, signing_key)?)
}

/// Resolve the request's session: extract, validate, then load.
pub async fn get_state<T: DeserializeOwned>(
    headers: &HeaderMap,
    uri: &Uri,
    signing_key: &str,
    store: &SessionStore,
) -> Result<(SessionToken, T), SessionError> {
    let token = session_token(headers, uri, signing_key)?;
    let state = store.get(&token).await?;
    Ok((token, state))
}

/// Delete the request's session and return its token.
pub async fn end_session(
    headers: &HeaderMap,
    uri: &Uri,
    signing_key: &str,
    store: &SessionStore,
) -> Result<SessionToken, SessionError> {
    let token = session_token(headers, uri, signing_key)?;
    store.delete(&token).await?;
    Ok(token)
}
