//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

/// Request body for the SET operation (PUT /set)
///
/// Keys are checked by the cache's validator, not here.
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store, kept as its UTF-8 bytes
    pub value: String,
    /// Optional TTL in seconds (0 = never expire)
    #[serde(default)]
    pub ttl: Option<u64>,
}
