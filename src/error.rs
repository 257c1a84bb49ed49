//! API Error Types
//!
//! One crate-wide error enum covering every failure class the HTTP and
//! socket surfaces can produce. Handlers return `ApiResult<T>` and the
//! `IntoResponse` impl renders the `{success: false, message}` envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API error kinds.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Input validation failed before reaching any state machine.
    #[error("{0}")]
    BadRequest(String),

    /// Missing/invalid/expired token, or wrong meeting password.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated but not allowed to perform the action.
    #[error("{0}")]
    Forbidden(String),

    /// No such meeting, user, or record.
    #[error("{0}")]
    NotFound(String),

    /// Meeting has ended or been cancelled.
    #[error("{0}")]
    Gone(String),

    /// Duplicate email/username, or minutes already generated.
    #[error("{0}")]
    Conflict(String),

    /// Meeting full, or rate limit exceeded.
    #[error("{0}")]
    ResourceExhausted(String),

    /// Operation not valid in the current state.
    #[error("{0}")]
    FailedPrecondition(String),

    /// Repository, queue, or SMTP failure. The cause is logged, never
    /// exposed to the client.
    #[error("Internal server error")]
    Internal(anyhow::Error),

    /// Transient upstream failure (LLM timeout); retried by the caller.
    #[error("{0}")]
    Unavailable(String),
}

/// Error response body for JSON responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Always false for errors.
    pub success: bool,
    /// Human-readable error message.
    pub message: String,
}

impl ApiError {
    /// HTTP status code for this error kind.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gone(_) => StatusCode::GONE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::FailedPrecondition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Shorthand for an internal error from any error value.
    pub fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(ref source) = self {
            tracing::error!(error = %source, "Internal error");
        }

        let body = Json(ErrorBody {
            success: false,
            message: self.to_string(),
        });

        (self.status(), body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        // Surface unique-key violations as Conflict so callers can report
        // duplicate usernames/emails/meeting codes meaningfully.
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return Self::Conflict("Duplicate value".to_string());
            }
        }
        Self::Internal(err.into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.into())
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Gone("meeting ended".into()).status(),
            StatusCode::GONE
        );
        assert_eq!(
            ApiError::ResourceExhausted("full".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::FailedPrecondition("not scheduled".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_internal_hides_source() {
        let err = ApiError::internal(std::io::Error::other("disk on fire"));
        assert_eq!(err.to_string(), "Internal server error");
    }
}
