//! Sign-in and sign-out.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::time::{self, Instant};
use utoipa::ToSchema;

use crate::auth::password::verify_password;
use crate::auth::session::{begin_session, end_session, SessionState};
use crate::error::{ApiError, ApiErrorBody};
use crate::gateway::HubError;
use crate::models::user::UserProfile;
use crate::AppState;

use super::users::auth_header;
use super::{method_not_allowed, JsonBody};

/// The only session a caller may end.
const OWN_SESSION: &str = "mine";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions", post(sign_in).fallback(method_not_allowed))
        .route(
            "/v1/sessions/{which}",
            delete(sign_out).fallback(method_not_allowed),
        )
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Sign in with email and password.
///
/// Every failure looks the same to the caller and takes at least the
/// configured failure delay. After five wrong passwords the email is locked
/// for five minutes.
#[utoipa::path(
    post,
    path = "/v1/sessions",
    tag = "Sessions",
    request_body = Credentials,
    responses(
        (status = 201, description = "Signed in; token in the Authorization header", body = UserProfile),
        (status = 401, description = "Cannot authenticate", body = ApiErrorBody),
        (status = 415, description = "Body is not JSON", body = ApiErrorBody),
    )
)]
pub async fn sign_in(
    State(state): State<AppState>,
    JsonBody(creds): JsonBody<Credentials>,
) -> Result<(StatusCode, HeaderMap, Json<UserProfile>), ApiError> {
    let deadline = Instant::now() + state.config.auth_failure_delay;

    if state.throttle.is_locked(&creds.email).await? {
        tracing::info!(email = %creds.email, "sign-in refused: too many failed attempts");
        return Err(reject_at(deadline).await);
    }

    let Some(user) = state.users.get_by_email(&creds.email).await? else {
        tracing::debug!(email = %creds.email, "sign-in failed: unknown email");
        return Err(reject_at(deadline).await);
    };

    if !verify_password(&creds.password, &user.password_hash) {
        match state.throttle.record_failure(&creds.email).await {
            Ok(failures) => tracing::info!(user_id = user.id, failures, "sign-in failed: wrong password"),
            // Answer like any other failure so the account stays hidden.
            Err(e) => tracing::error!(user_id = user.id, error = %e, "failed to record sign-in failure"),
        }
        return Err(reject_at(deadline).await);
    }
    state.throttle.record_success(&creds.email).await?;

    let profile = UserProfile::from(&user);
    let token = begin_session(
        &state.config.session_key,
        &state.sessions,
        &SessionState::new(profile.clone()),
    )
    .await?;

    tracing::info!(user_id = user.id, "user signed in");
    Ok((StatusCode::CREATED, auth_header(&token.bearer())?, Json(profile)))
}

/// Fail only once `deadline` has passed, so every failure takes the same time.
async fn reject_at(deadline: Instant) -> ApiError {
    time::sleep_until(deadline).await;
    ApiError::unauthorized()
}

/// End the caller's own session and close its event connection.
#[utoipa::path(
    delete,
    path = "/v1/sessions/{which}",
    tag = "Sessions",
    params(("which" = String, Path, description = "Must be `mine`")),
    responses(
        (status = 200, description = "Signed out", body = String),
        (status = 401, description = "Cannot authenticate", body = ApiErrorBody),
        (status = 403, description = "Not your session", body = ApiErrorBody),
    )
)]
pub async fn sign_out(
    State(state): State<AppState>,
    Path(which): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<&'static str, ApiError> {
    if which != OWN_SESSION {
        return Err(ApiError::forbidden("You can only end your own session"));
    }

    let token = end_session(&headers, &uri, &state.config.session_key, &state.sessions).await?;

    match state.hub.unregister(token.as_str()).await {
        Ok(user_id) => tracing::debug!(user_id, "closed event connection on sign-out"),
        Err(HubError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }

    tracing::info!("session ended");
    Ok("signed out")
}
