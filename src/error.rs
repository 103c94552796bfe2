use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use crate::proxy::SessionError;
use crate::store::StoreError;

/// HTTP API error with appropriate status codes and client-safe messages.
/// Internal detail is logged, never returned to the client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => ApiError::unauthorized("invalid credentials"),
            AuthError::InvalidToken(e) => {
                ApiError::unauthorized(format!("invalid token: {e}"))
            }
            AuthError::TokenGeneration(e) => {
                error!("failed to generate token: {}", e);
                ApiError::internal("internal server error")
            }
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::not_found(what),
            StoreError::InvalidToken(_) => {
                ApiError::unauthorized("invalid or expired refresh token")
            }
            StoreError::Sqlx(e)
                if e
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation()) =>
            {
                ApiError::Conflict("already exists".into())
            }
            other => {
                error!("store error: {}", other);
                ApiError::internal("internal server error")
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::DatabaseNotFound(name) => {
                ApiError::not_found(format!("database not found: {name}"))
            }
            SessionError::SessionNotFound => ApiError::not_found("session not found"),
            SessionError::BackendUnavailable(detail) => {
                error!("backend unavailable: {}", detail);
                ApiError::BadGateway("backend unavailable".into())
            }
            SessionError::ProvisionFailed(detail) => {
                error!("provisioning failed: {}", detail);
                ApiError::internal("failed to start proxy")
            }
            SessionError::PortAllocation(e) => {
                error!("port allocation failed: {}", e);
                ApiError::internal("failed to start proxy")
            }
            SessionError::Store(e) => e.into(),
        }
    }
}
