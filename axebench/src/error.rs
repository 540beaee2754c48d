//! Error types for axebench
//!
//! Library operations return [`Error`]; HTTP handlers convert it into
//! [`ApiError`], which renders a JSON error body.

use crate::device::DeviceError;
use crate::tuning::StabilizationFailure;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the axebench library
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid run parameters or configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device could not be reached or rejected a command
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Settings could not be brought up on the device
    #[error(transparent)]
    Stabilization(#[from] StabilizationFailure),

    /// Operation not valid in the current phase
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A run is already active on this session
    #[error("Benchmark already running")]
    AlreadyRunning,

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Errors from axebench-common (config, serialization, lookups)
    #[error(transparent)]
    Common(#[from] axebench_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the axebench Error
pub type Result<T> = std::result::Result<T, Error>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. benchmark already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Config(msg) => ApiError::BadRequest(msg),
            Error::AlreadyRunning => ApiError::Conflict(err.to_string()),
            Error::InvalidState(msg) => ApiError::BadRequest(msg),
            Error::Common(axebench_common::Error::NotFound(msg)) => ApiError::NotFound(msg),
            Error::Common(axebench_common::Error::InvalidInput(msg))
            | Error::Common(axebench_common::Error::Config(msg)) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<axebench_common::Error> for ApiError {
    fn from(err: axebench_common::Error) -> Self {
        ApiError::from(Error::Common(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_to_api_error_mapping() {
        assert!(matches!(ApiError::from(Error::AlreadyRunning), ApiError::Conflict(_)));
        assert!(matches!(
            ApiError::from(Error::Config("bad".into())),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(axebench_common::Error::NotFound("x.json".into())),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(Error::InvalidState("Benchmark not paused".into())),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(Error::Device(DeviceError::Network("timeout".into()))),
            ApiError::Internal(_)
        ));
        assert!(matches!(
            ApiError::from(Error::Stabilization(StabilizationFailure::Cancelled)),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::Conflict("busy".into()).into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::BadRequest("nope".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("gone".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
