//! Custom error types for the booking service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Custom error type for the booking service
///
/// Not-found, state-conflict, and validation failures are distinct
/// variants so callers can tell an unknown id apart from "found but in the
/// wrong state".
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed or rejected input
    #[error("{0}")]
    Validation(String),

    /// The request races or duplicates an existing claim
    #[error("{0}")]
    Conflict(String),

    /// The entity exists but is not in a state that permits the transition
    #[error("{0}")]
    InvalidState(String),

    /// Unknown entity
    #[error("{0}")]
    NotFound(String),

    /// Missing or invalid credentials
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("{0}")]
    Forbidden(String),

    /// Row could not be converted into a domain value
    #[error("{0}")]
    Conversion(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Anything unanticipated
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            // State conflicts and wrong-state transitions are client errors
            // the caller must resolve, not retry
            ApiError::Validation(msg) | ApiError::Conflict(msg) | ApiError::InvalidState(msg) => {
                (StatusCode::BAD_REQUEST, msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            e @ (ApiError::Conversion(_) | ApiError::Database(_) | ApiError::Internal(_)) => {
                tracing::error!("Unexpected error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for booking service results
pub type ApiResult<T> = Result<T, ApiError>;
