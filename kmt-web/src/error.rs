//! Error types for kmt-web
//!
//! Every handler returns [`ApiResult`]; errors render as `{"error": ...}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::validation::ValidationErrors;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("{0}")]
    BadRequest(String),

    /// Body failed validation (400), rendered as form/field errors
    #[error("Validation failed")]
    Validation(ValidationErrors),

    /// No valid session (401)
    #[error("Unauthorized")]
    Unauthorized,

    /// Wrong email or password (401)
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Authenticated but not allowed (403)
    #[error("Forbidden")]
    Forbidden,

    /// Resource not found (404)
    #[error("Not found")]
    NotFound,

    /// Conflict (409), e.g. email already registered
    #[error("{0}")]
    Conflict(String),

    /// Rate limit hit (429)
    #[error("Too many requests")]
    TooManyRequests,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// kmt-common error
    #[error("Common error: {0}")]
    Common(#[from] kmt_common::Error),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Validation(errors) => (StatusCode::BAD_REQUEST, json!({ "error": errors })),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": "Unauthorized" })),
            ApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, json!({ "error": "Invalid credentials" }))
            }
            ApiError::Forbidden => (StatusCode::FORBIDDEN, json!({ "error": "Forbidden" })),
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": "Not found" })),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            ApiError::TooManyRequests => {
                (StatusCode::TOO_MANY_REQUESTS, json!({ "error": "Too many requests" }))
            }
            ApiError::Database(ref err) => {
                error!(error = %err, "Database error while handling request");
                internal()
            }
            ApiError::Common(ref err) => {
                error!(error = %err, "Request failed");
                internal()
            }
            ApiError::Internal(ref msg) => {
                error!(error = %msg, "Internal error while handling request");
                internal()
            }
        };

        (status, Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "Internal server error" }),
    )
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// True when a database error is a UNIQUE constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}
