//! Error types for the cache subsystem
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache backends, helpers and the management API.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key absent or expired. A miss, not an operational failure.
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Backend unreachable or the network round trip failed
    #[error("Backend unavailable: {0}")]
    Transport(String),

    /// Operation attempted after `close()`
    #[error("Cache backend is closed")]
    Closed,

    /// The execution context was cancelled
    #[error("Operation canceled")]
    Canceled,

    /// The execution context deadline elapsed
    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or malformed backend parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A get-or-set compute function failed
    #[error("Compute failed: {0}")]
    Compute(anyhow::Error),
}

impl CacheError {
    /// Returns true for the "key absent or expired" case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Transport(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Transport(_) | CacheError::Closed | CacheError::Canceled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            CacheError::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CacheError::InvalidConfiguration(_) | CacheError::Compute(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache subsystem.
pub type Result<T> = std::result::Result<T, CacheError>;
