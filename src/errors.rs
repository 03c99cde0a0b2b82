use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Why an authentication check rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No token was presented on any carrier.
    Missing,
    /// Bad signature, expired, malformed subject, or unknown user. Also
    /// covers a wrong password on login/password change.
    Invalid,
    /// A refresh token that was rotated out or revoked server-side.
    Stale,
}

impl AuthFailure {
    pub fn message(&self) -> &'static str {
        match self {
            AuthFailure::Missing => "authentication token is required",
            AuthFailure::Invalid => "invalid or expired token",
            AuthFailure::Stale => "refresh token is expired or already used",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Auth(AuthFailure),

    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Db(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => {
                AppError::Conflict("user with given email or username already exists".into())
            }
            StoreError::Backend(msg) => AppError::Db(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::Validation(s) => (StatusCode::BAD_REQUEST, s.as_str()),
            AppError::Auth(failure) => (StatusCode::UNAUTHORIZED, failure.message()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not found"),
            AppError::Conflict(s) => (StatusCode::CONFLICT, s.as_str()),
            AppError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database error"),
            AppError::Upload(_) => (StatusCode::INTERNAL_SERVER_ERROR, "upload error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status, Json(json!({ "error": msg }))).into_response()
    }
}
