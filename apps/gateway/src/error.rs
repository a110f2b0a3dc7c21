use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::session::SessionError;
use crate::auth::token::TokenError;
use crate::db::kv::KvError;
use crate::db::users::UserStoreError;
use crate::gateway::hub::HubError;

/// Body of every authentication failure. Which check failed is only logged.
pub const AUTH_FAILED: &str = "Cannot authenticate";

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Vec<FieldError>>,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// The generic authentication failure.
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", AUTH_FAILED)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            "Method not allowed",
        )
    }

    pub fn unsupported_media_type() -> Self {
        Self::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "UNSUPPORTED_MEDIA_TYPE",
            "Content-Type must be application/json",
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "BAD_GATEWAY", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn validation(details: Vec<FieldError>) -> Self {
        Self {
            details: Some(details),
            ..Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Validation failed")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::EmptyKey | TokenError::Randomness => {
                tracing::error!(?err, "token creation failed");
                Self::internal("An internal error occurred")
            }
            other => {
                tracing::debug!(err = ?other, "token rejected");
                Self::unauthorized()
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Token(e) => e.into(),
            SessionError::NotFound => {
                tracing::debug!("session not found or expired");
                Self::unauthorized()
            }
            SessionError::Deserialize(e) => {
                tracing::warn!(?e, "stored session is corrupt");
                Self::unauthorized()
            }
            SessionError::Serialize(e) => {
                tracing::error!(?e, "session serialization failed");
                Self::internal("An internal error occurred")
            }
            SessionError::Store(e) => e.into(),
        }
    }
}

impl From<KvError> for ApiError {
    fn from(err: KvError) -> Self {
        tracing::error!(?err, "key-value store error");
        Self::internal("An internal error occurred")
    }
}

impl From<UserStoreError> for ApiError {
    fn from(err: UserStoreError) -> Self {
        match err {
            UserStoreError::Duplicate(field) => {
                Self::bad_request(format!("{field} is already registered"))
            }
            UserStoreError::Unavailable(reason) => {
                tracing::error!(%reason, "user store error");
                Self::internal("An internal error occurred")
            }
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::DuplicateToken | HubError::AlreadyLinked => {
                Self::conflict("A connection is already open for this session")
            }
            HubError::NotFound => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "No connection for this session",
            ),
            HubError::NoActiveConnection(users) => {
                Self::conflict(format!("No active connection for users {users:?}"))
            }
            HubError::Closed => {
                tracing::error!("broadcast engine is not running");
                Self::internal("An internal error occurred")
            }
        }
    }
}
