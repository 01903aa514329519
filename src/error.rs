//! Error handling for the booth server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session does not exist
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session is completed or expired, no further transitions
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Resource not found (photo, file)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another session is mid-burst
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Camera could not be connected
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    /// Device operation attempted while disconnected
    #[error("Camera not connected")]
    NotConnected,

    /// Device-level capture failure
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Image could not be decoded/processed
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// Every photo in a burst failed
    #[error("All captures failed: {}", .0.join("; "))]
    AllCapturesFailed(Vec<String>),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLx database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::SessionNotFound(msg) => {
                (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", msg.clone())
            }
            Error::SessionClosed(msg) => (StatusCode::BAD_REQUEST, "SESSION_CLOSED", msg.clone()),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            Error::CameraUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CAMERA_UNAVAILABLE",
                msg.clone(),
            ),
            Error::NotConnected => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CAMERA_NOT_CONNECTED",
                "Camera not connected".to_string(),
            ),
            Error::CaptureFailed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CAPTURE_FAILED",
                msg.clone(),
            ),
            Error::ProcessingFailed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROCESSING_FAILED",
                msg.clone(),
            ),
            Error::AllCapturesFailed(reasons) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ALL_CAPTURES_FAILED",
                format!("All captures failed: {}", reasons.join("; ")),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::SessionClosed("x".into()), StatusCode::BAD_REQUEST),
            (Error::Conflict("x".into()), StatusCode::CONFLICT),
            (
                Error::CameraUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::NotConnected, StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::AllCapturesFailed(vec!["a".into(), "b".into()]),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let resp = err.into_response();
            assert_eq!(resp.status(), expected);
        }
    }

    #[test]
    fn test_all_captures_failed_joins_reasons() {
        let err = Error::AllCapturesFailed(vec!["photo 1 timed out".into(), "photo 2 io".into()]);
        let msg = err.to_string();
        assert!(msg.contains("photo 1 timed out"));
        assert!(msg.contains("photo 2 io"));
    }
}
