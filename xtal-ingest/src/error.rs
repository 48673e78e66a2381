//! Error types for xtal-ingest
//!
//! `IngestError` is what the engine returns; `ApiError` is how the HTTP front
//! end reports it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

use crate::registry::RegistryError;

/// Engine error type
#[derive(Debug, Error)]
pub enum IngestError {
    /// Plate store failure
    #[error("Store error: {0}")]
    Store(#[from] xtal_common::Error),

    /// Registry failure (never a classification result; those live on the descriptor)
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Filesystem failure while promoting a plate
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Starting, stopping or talking to the collector failed
    #[error("Execution context error: {0}")]
    Context(String),

    /// The collector's tick loop is not running
    #[error("Collector is not running")]
    Stopped,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    /// Failures worth retrying on the next tick without any operator action
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Store(err) => err.is_transient(),
            IngestError::Registry(err) => err.is_retryable(),
            IngestError::Io { .. } => true,
            _ => false,
        }
    }
}

/// Result type for engine operations
pub type IngestResult<T> = Result<T, IngestError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Collector unavailable (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        if err.is_transient() || matches!(err, IngestError::Stopped) {
            ApiError::Unavailable(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg)
            }
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
pub type ApiResult<T> = Result<T, ApiError>;
