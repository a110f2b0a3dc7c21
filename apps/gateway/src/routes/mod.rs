pub mod health;
pub mod sessions;
pub mod users;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(users::router())
        .merge(sessions::router())
        .merge(crate::gateway::server::router())
        .merge(crate::proxy::router())
}

/// JSON request body whose rejections use the API error format:
/// 415 without a JSON content type, 400 for anything unparseable.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(JsonRejection::MissingJsonContentType(_)) => Err(ApiError::unsupported_media_type()),
            Err(rejection) => {
                tracing::debug!(reason = %rejection.body_text(), "rejected request body");
                Err(ApiError::bad_request("Malformed request body"))
            }
        }
    }
}

pub(crate) async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        users::sign_up,
        sessions::sign_in,
        sessions::sign_out,
        crate::gateway::server::ws_upgrade,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            crate::models::user::UserProfile,
            health::HealthResponse,
            users::SignUpRequest,
            sessions::Credentials,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Readiness"),
        (name = "Users", description = "Account sign-up"),
        (name = "Sessions", description = "Sign-in and sign-out"),
        (name = "Gateway", description = "Event delivery over WebSocket"),
    )
)]
pub struct ApiDoc;
