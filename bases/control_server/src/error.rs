// bases/control_server/src/error.rs
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use control_primitives::ValidationError;
use media_library::{LibraryError, TransferError};
use playback_session::SessionError;
use serde_json::json;

/// Handler-level errors with their HTTP mapping. Bodies follow the
/// `{"success": false, "error": ...}` convention.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Busy,
    NoActiveSession,
    Conflict(String),
    TooLarge(String),
    Internal(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::MediaNotFound(_) => ApiError::NotFound(err.to_string()),
            _ => ApiError::Validation(err.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Validation(e) => e.into(),
            SessionError::Busy => ApiError::Busy,
            SessionError::NoActiveSession => ApiError::NoActiveSession,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            LibraryError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Conflict(_) => ApiError::Conflict(err.to_string()),
            TransferError::TooLarge { .. } => ApiError::TooLarge(err.to_string()),
            TransferError::SizeMismatch { .. } => ApiError::Validation(err.to_string()),
            TransferError::Failed(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                "another command is in flight, retry shortly".to_string(),
            ),
            ApiError::NoActiveSession => {
                (StatusCode::CONFLICT, "no active playback session".to_string())
            }
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::TooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}
