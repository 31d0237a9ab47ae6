//! Cache Statistics Module
//!
//! Tracks per-shard counters and assembles the detailed metrics report.

use std::collections::BTreeMap;

use serde::Serialize;

/// A shard is hot once its op count or lock wait reaches this multiple of the mean.
pub const HOT_SHARD_FACTOR: f64 = 2.0;

/// Shards with fewer operations than this are never reported hot.
pub const HOT_SHARD_MIN_OPS: u64 = 100;

// == Shard Stats ==
/// Counters owned by a single shard, updated under its lock.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShardStats {
    /// Successful lookups
    pub hits: u64,
    /// Lookups for absent or expired keys
    pub misses: u64,
    /// Accepted writes
    pub sets: u64,
    /// Entries removed to make room under the global bounds
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Bytes currently held by the shard
    pub bytes_used: usize,
}

impl ShardStats {
    // == Constructor ==
    /// Creates a new ShardStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_set(&mut self) {
        self.sets += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }
}

// == Shard Metrics ==
/// Point-in-time view of one shard, including lock contention.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShardMetrics {
    pub shard_id: usize,
    pub entries: usize,
    pub bytes_used: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Lock acquisitions (every routed operation)
    pub operations: u64,
    /// Acquisitions that had to wait for another holder
    pub lock_contentions: u64,
    /// Total time spent waiting for the lock
    pub lock_wait_micros: u64,
}

// == Detailed Metrics ==
/// Full engine report returned by `get_detailed_metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetailedMetrics {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
    pub total_entries: usize,
    pub total_bytes: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
    pub shards: Vec<ShardMetrics>,
    pub hot_shards: Vec<usize>,
    pub rebalance_count: u64,
    pub wal_replay_count: u64,
    pub wal_records_replayed: u64,
    pub wal_last_sequence: Option<u64>,
    pub degraded: bool,
    pub sweep_interval_secs: f64,
    pub snapshots_created: u64,
    pub incidents: BTreeMap<String, u64>,
}

impl DetailedMetrics {
    /// Sums per-shard counters into the totals.
    pub fn from_shards(shards: Vec<ShardMetrics>) -> Self {
        let mut metrics = Self::default();
        for shard in &shards {
            metrics.hits += shard.hits;
            metrics.misses += shard.misses;
            metrics.sets += shard.sets;
            metrics.evictions += shard.evictions;
            metrics.expirations += shard.expirations;
        }
        metrics.hit_rate = hit_rate(metrics.hits, metrics.misses);
        metrics.hot_shards = detect_hot_shards(&shards);
        metrics.shards = shards;
        metrics
    }
}

// == Hit Rate ==
/// Returns hits / (hits + misses), or 0.0 if no requests have been made.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// == Hot Shard Detection ==
/// Shards whose operation count or lock wait is anomalously high relative to the mean.
pub fn detect_hot_shards(shards: &[ShardMetrics]) -> Vec<usize> {
    if shards.is_empty() {
        return Vec::new();
    }
    let n = shards.len() as f64;
    let mean_ops = shards.iter().map(|s| s.operations).sum::<u64>() as f64 / n;
    let mean_wait = shards.iter().map(|s| s.lock_wait_micros).sum::<u64>() as f64 / n;

    shards
        .iter()
        .filter(|s| s.operations >= HOT_SHARD_MIN_OPS)
        .filter(|s| {
            let busy = s.operations as f64 >= HOT_SHARD_FACTOR * mean_ops;
            let contended =
                s.lock_wait_micros > 0 && s.lock_wait_micros as f64 >= HOT_SHARD_FACTOR * mean_wait;
            busy || contended
        })
        .map(|s| s.shard_id)
        .collect()
}
