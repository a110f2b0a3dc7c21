//! Sign-up.

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::password::hash_password;
use crate::auth::session::{begin_session, SessionState};
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::models::user::{gravatar_url, NewUser, UserProfile, DEFAULT_USER_TYPE};
use crate::AppState;

use super::{method_not_allowed, JsonBody};

const MIN_PASSWORD_LEN: usize = 6;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/users", post(sign_up).fallback(method_not_allowed))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub password_conf: String,
    pub user_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl SignUpRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: &str| {
            errors.push(FieldError {
                field: field.to_string(),
                message: message.to_string(),
            })
        };

        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => fail("email", "must be a valid email address"),
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            fail("password", "must be at least 6 characters");
        }
        if self.password != self.password_conf {
            fail("passwordConf", "must match password");
        }
        if self.user_name.is_empty() {
            fail("userName", "must not be empty");
        } else if self.user_name.contains(char::is_whitespace) {
            fail("userName", "must not contain spaces");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(errors))
        }
    }
}

/// Create an account and sign it in.
#[utoipa::path(
    post,
    path = "/v1/users",
    tag = "Users",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Account created; token in the Authorization header", body = UserProfile),
        (status = 400, description = "Invalid sign-up", body = ApiErrorBody),
        (status = 415, description = "Body is not JSON", body = ApiErrorBody),
    )
)]
pub async fn sign_up(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<SignUpRequest>,
) -> Result<(StatusCode, HeaderMap, Json<UserProfile>), ApiError> {
    body.validate()?;

    let email = body.email.trim().to_string();
    let user = state
        .users
        .insert(NewUser {
            photo_url: gravatar_url(&email),
            email,
            password_hash: hash_password(&body.password)?,
            user_name: body.user_name,
            first_name: body.first_name,
            last_name: body.last_name,
            user_type: DEFAULT_USER_TYPE.to_string(),
        })
        .await?;

    let profile = UserProfile::from(&user);
    let token = begin_session(
        &state.config.session_key,
        &state.sessions,
        &SessionState::new(profile.clone()),
    )
    .await?;

    tracing::info!(user_id = user.id, user_name = %user.user_name, "user signed up");
    Ok((StatusCode::CREATED, auth_header(&token.bearer())?, Json(profile)))
}

pub(super) fn auth_header(bearer: &str) -> Result<HeaderMap, ApiError> {
    let value = HeaderValue::from_str(bearer).map_err(|e| {
        tracing::error!(?e, "token is not a valid header value");
        ApiError::internal("An internal error occurred")
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}
