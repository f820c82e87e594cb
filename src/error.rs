use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

#[derive(Debug, Error)]
pub enum ThrottlerError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ThrottlerError {
    /// Storage failures mean the throttling decision could not be made.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            ThrottlerError::Redis(_) | ThrottlerError::Database(_) | ThrottlerError::Timeout(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ThrottlerError::Redis(_) | ThrottlerError::Database(_) | ThrottlerError::Timeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ThrottlerError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ThrottlerError::Serialization(_) | ThrottlerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<redis::RedisError> for ThrottlerError {
    fn from(err: redis::RedisError) -> Self {
        ThrottlerError::Redis(err.to_string())
    }
}

impl From<sqlx::Error> for ThrottlerError {
    fn from(err: sqlx::Error) -> Self {
        ThrottlerError::Database(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ThrottlerError {
    fn from(err: validator::ValidationErrors) -> Self {
        ThrottlerError::ValidationError(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_throttler_error(err: &ThrottlerError) -> Self {
        let code = err.status_code().as_u16();
        match err {
            // Backend details stay in the logs.
            ThrottlerError::Redis(_) | ThrottlerError::Database(_) | ThrottlerError::Timeout(_) => {
                Self::new("service_unavailable", "Access control is temporarily unavailable", code)
            }
            ThrottlerError::ValidationError(msg) => Self::new("validation_error", msg, code),
            ThrottlerError::Serialization(_) | ThrottlerError::Internal(_) => {
                Self::new("internal_error", "Internal server error", code)
            }
        }
    }
}

impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");
        let body = ErrorResponse::from_throttler_error(&self);
        (self.status_code(), Json(body)).into_response()
    }
}
