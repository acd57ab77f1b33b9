//! Error types for the HTTP status surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use drive_changelog_core::SyncError;
use serde::Serialize;

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
            code: &'static str,
        }

        let (status, code) = match &self {
            ApiError::Sync(SyncError::Remote(_)) => (StatusCode::BAD_GATEWAY, "REMOTE_ERROR"),
            ApiError::Sync(SyncError::Cancelled) => {
                (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED")
            }
            ApiError::Sync(SyncError::Cursor(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CURSOR_ERROR")
            }
            ApiError::Sync(SyncError::EventLog(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "EVENT_LOG_ERROR")
            }
            ApiError::Sync(_) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = ErrorBody {
            error: self.to_string(),
            code,
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
