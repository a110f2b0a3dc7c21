//! WebSocket upgrade endpoint.

use axum::extract::{State, WebSocketUpgrade};
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::auth::middleware::AuthSession;
use crate::auth::token;
use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

use super::connection::{self, MAX_MESSAGE_SIZE};

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/ws", get(ws_upgrade))
}

/// Open the caller's event connection.
///
/// The connection is registered under the token in the `auth` query
/// parameter, which must be the same session token the request
/// authenticated with.
#[utoipa::path(
    get,
    path = "/v1/ws",
    tag = "Gateway",
    params(("auth" = String, Query, description = "Session token, optionally as `Bearer <token>`")),
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 401, description = "Not authenticated", body = ApiErrorBody),
    )
)]
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    session: AuthSession,
    uri: Uri,
) -> Result<impl IntoResponse, ApiError> {
    let raw = token::extract_from_auth_param(&uri)?;
    let conn_token = token::validate(&raw, &state.config.session_key)?;
    if conn_token != session.token {
        tracing::debug!("auth parameter does not match the session token");
        return Err(ApiError::unauthorized());
    }

    let user_id = session.state.user.id;
    let hub = state.hub.clone();
    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| connection::serve(socket, hub, conn_token.into_string(), user_id)))
}
