//! HTTP surface error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// HTTP surface error types
#[derive(Debug, Error)]
pub enum Error {
    /// Requested name is not a plain file name inside the recordings directory
    #[error("Invalid file name: {0}")]
    InvalidFilename(String),

    /// Recording does not exist
    #[error("Recording not found: {0}")]
    NotFound(String),

    /// Server setup or runtime error
    #[error("Server error: {0}")]
    ServerError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for HTTP surface operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error type (e.g., "invalid_filename", "not_found", "internal")
    error_type: &'static str,
    /// Human-readable error message
    message: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidFilename(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ServerError(_) | Error::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Error::InvalidFilename(_) => "invalid_filename",
            Error::NotFound(_) => "not_found",
            Error::ServerError(_) | Error::IoError(_) => "internal",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("HTTP request failed: {}", self);
        }
        let body = ErrorResponse {
            error_type: self.error_type(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::InvalidFilename("..".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            Error::from(io).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
