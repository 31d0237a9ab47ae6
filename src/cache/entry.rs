//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// A single cache entry: opaque value bytes plus placement and expiry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The entry's key
    pub key: String,
    /// The stored value
    #[serde(with = "crate::wal::base64_bytes")]
    pub value: Vec<u8>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expire_at: Option<u64>,
    /// Accounted size: key bytes plus value bytes
    pub size_bytes: usize,
    /// Shard currently holding the entry
    pub shard_id: usize,
    /// Virtual slot the key hashes to
    pub slot: usize,
    /// WAL sequence of the write that produced this entry, 0 when unlogged
    #[serde(default)]
    pub sequence: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry created at `now_ms`.
    ///
    /// A `ttl_seconds` of zero means the entry never expires.
    pub fn new(
        key: String,
        value: Vec<u8>,
        ttl_seconds: u64,
        now_ms: u64,
        shard_id: usize,
        slot: usize,
    ) -> Self {
        let expire_at =
            (ttl_seconds > 0).then(|| now_ms.saturating_add(ttl_seconds.saturating_mul(1000)));
        let size_bytes = entry_size(&key, &value);

        Self {
            key,
            value,
            created_at: now_ms,
            expire_at,
            size_bytes,
            shard_id,
            slot,
            sequence: 0,
        }
    }

    /// Tags the entry with the WAL sequence of the write that produced it.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    // == Is Expired ==
    /// Checks whether the entry has expired at `now_ms`.
    ///
    /// An entry is expired once `expire_at <= now`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expire_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expire_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }
}

/// Bytes accounted against the memory bound for a key/value pair.
pub fn entry_size(key: &str, value: &[u8]) -> usize {
    key.len() + value.len()
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
