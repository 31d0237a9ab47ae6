//! Error types for the cache engine
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
/// Unified error type for the cache engine and its HTTP surface.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key rejected by the validator
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// No evictable headroom left for the entry
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// A WAL frame could not be written
    #[error("WAL write failed: {0}")]
    WalWrite(String),

    /// A WAL segment could not be read back
    #[error("WAL replay failed: {0}")]
    WalReplay(String),

    /// Snapshot creation, loading or cleanup failed
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Key not found in cache (HTTP surface only)
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Underlying filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame or snapshot encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            CacheError::CacheFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::WalWrite(_)
            | CacheError::WalReplay(_)
            | CacheError::Snapshot(_)
            | CacheError::Io(_)
            | CacheError::Serialization(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
