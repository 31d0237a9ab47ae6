//! Cache Module
//!
//! Sharded in-memory storage with TTL expiration, global bounds and key validation.

mod core;
pub(crate) mod entry;
pub(crate) mod shard;
mod stats;
mod validator;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use self::core::{stable_hash, Route, ShardRouter, ShardedCacheCore, SLOTS_PER_SHARD};
pub use entry::{current_timestamp_ms, CacheEntry};
pub use shard::{Lookup, Shard};
pub use stats::{
    detect_hot_shards, hit_rate, DetailedMetrics, ShardMetrics, ShardStats, HOT_SHARD_FACTOR,
    HOT_SHARD_MIN_OPS,
};
pub use validator::{KeyValidator, ValidationMode};
