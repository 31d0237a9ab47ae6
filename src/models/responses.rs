//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::snapshot::SnapshotInfo;

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub key: String,
    /// Stored bytes decoded as UTF-8 (lossy)
    pub value: String,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: &[u8]) -> Self {
        Self {
            key: key.into(),
            value: String::from_utf8_lossy(value).into_owned(),
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    pub message: String,
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for POST /clear
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

/// Response body for GET /size
#[derive(Debug, Clone, Serialize)]
pub struct SizeResponse {
    pub size: usize,
}

/// Response body for POST /snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResponse {
    pub path: String,
    pub timestamp_ms: u64,
    pub wal_sequence: u64,
}

impl From<SnapshotInfo> for SnapshotResponse {
    fn from(info: SnapshotInfo) -> Self {
        Self {
            path: info.path.display().to_string(),
            timestamp_ms: info.timestamp_ms,
            wal_sequence: info.wal_sequence,
        }
    }
}

/// Response body for GET /hot-shards
#[derive(Debug, Clone, Serialize)]
pub struct HotShardsResponse {
    pub hot_shards: Vec<usize>,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    /// True while a WAL fault is unrepaired
    pub degraded: bool,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(degraded: bool) -> Self {
        let status = if degraded { "degraded" } else { "healthy" };
        Self {
            status: status.to_string(),
            degraded,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
