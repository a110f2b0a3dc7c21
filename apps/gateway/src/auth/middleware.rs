//! Session extraction for handlers that require a signed-in client.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth::session::{self, SessionState};
use crate::auth::token::SessionToken;
use crate::error::ApiError;
use crate::AppState;

/// The caller's resolved session, from the `Authorization` header or the
/// `auth` query parameter. Rejects with the generic 401.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: SessionToken,
    pub state: SessionState,
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let (token, session) = session::get_state::<SessionState>(
            &parts.headers,
            &parts.uri,
            &state.config.session_key,
            &state.sessions,
        )
        .await?;

        Ok(AuthSession {
            token,
            state: session,
        })
    }
}
