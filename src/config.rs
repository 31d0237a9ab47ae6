//! Configuration Module
//!
//! Handles loading and managing engine and server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::ValidationMode;
use crate::wal::FlushPolicy;

/// What the bounds incident handler clears when a set cannot be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundsPolicy {
    /// Clear only the shard that ran out of headroom
    #[default]
    ClearShard,
    /// Clear the whole cache
    ClearAll,
}

impl FromStr for BoundsPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shard" => Ok(Self::ClearShard),
            "all" => Ok(Self::ClearAll),
            other => Err(format!("unknown bounds policy: {other}")),
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default TTL in seconds for entries set without explicit TTL (0 = never expire)
    pub ttl_seconds: u64,
    /// Base interval in seconds for the adaptive TTL sweep
    pub cleanup_interval: u64,
    /// Number of shards
    pub num_shards: usize,
    /// Whether mutations are written to the WAL
    pub enable_wal: bool,
    /// Directory holding WAL segments; snapshots live in its sibling `snapshots/`
    pub wal_path: PathBuf,
    /// Maximum number of entries across all shards
    pub max_entries: usize,
    /// Maximum bytes (key + value) across all shards, in megabytes
    pub max_memory_mb: usize,
    /// Forces strict validation and enables accounting checks every sweep
    pub paranoia_mode: bool,
    /// Key validation strictness
    pub validation_mode: ValidationMode,
    /// Seconds between automatic snapshots
    pub snapshot_interval: u64,
    /// Seconds a snapshot is kept before cleanup removes it
    pub snapshot_ttl: u64,
    /// Seconds a covered WAL segment is kept before cleanup removes it
    pub wal_ttl: u64,
    /// Seconds between shard balance checks
    pub balance_interval: u64,
    /// max/avg shard entry ratio that triggers migration
    pub skew_threshold: f64,
    /// WAL flush cadence in milliseconds (0 = flush and sync every write)
    pub wal_flush_interval_ms: u64,
    /// Reaction to a `CacheBoundsExceeded` incident
    pub bounds_policy: BoundsPolicy,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_TTL_SECONDS` - Default TTL in seconds (default: 3600)
    /// - `CLEANUP_INTERVAL` - Base sweep interval in seconds (default: 30)
    /// - `NUM_SHARDS` - Shard count (default: 16)
    /// - `ENABLE_WAL` - Write-ahead logging toggle (default: true)
    /// - `WAL_PATH` - WAL directory (default: ./data/wal)
    /// - `MAX_ENTRIES` - Maximum cache entries (default: 100000)
    /// - `MAX_MEMORY_MB` - Memory bound in MB (default: 512)
    /// - `PARANOIA_MODE` - Strict validation + consistency checks (default: false)
    /// - `CACHE_VALIDATION_MODE` - strict | normal | relaxed (default: normal)
    /// - `SNAPSHOT_INTERVAL` - Seconds between snapshots (default: 3600)
    /// - `SNAPSHOT_TTL` - Snapshot retention in seconds (default: 86400)
    /// - `WAL_TTL` - WAL segment retention in seconds (default: 604800)
    /// - `BALANCE_INTERVAL` - Seconds between balance checks (default: 60)
    /// - `SKEW_THRESHOLD` - Rebalance trigger ratio (default: 1.5)
    /// - `WAL_FLUSH_INTERVAL_MS` - WAL flush cadence (default: 1000)
    /// - `BOUNDS_POLICY` - shard | all (default: shard)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl_seconds: parse_env("CACHE_TTL_SECONDS").unwrap_or(defaults.ttl_seconds),
            cleanup_interval: parse_env("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            num_shards: parse_env("NUM_SHARDS").unwrap_or(defaults.num_shards),
            enable_wal: parse_env("ENABLE_WAL").unwrap_or(defaults.enable_wal),
            wal_path: env::var("WAL_PATH")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.wal_path),
            max_entries: parse_env("MAX_ENTRIES").unwrap_or(defaults.max_entries),
            max_memory_mb: parse_env("MAX_MEMORY_MB").unwrap_or(defaults.max_memory_mb),
            paranoia_mode: parse_env("PARANOIA_MODE").unwrap_or(defaults.paranoia_mode),
            validation_mode: parse_env("CACHE_VALIDATION_MODE")
                .unwrap_or(defaults.validation_mode),
            snapshot_interval: parse_env("SNAPSHOT_INTERVAL")
                .unwrap_or(defaults.snapshot_interval),
            snapshot_ttl: parse_env("SNAPSHOT_TTL").unwrap_or(defaults.snapshot_ttl),
            wal_ttl: parse_env("WAL_TTL").unwrap_or(defaults.wal_ttl),
            balance_interval: parse_env("BALANCE_INTERVAL").unwrap_or(defaults.balance_interval),
            skew_threshold: parse_env("SKEW_THRESHOLD").unwrap_or(defaults.skew_threshold),
            wal_flush_interval_ms: parse_env("WAL_FLUSH_INTERVAL_MS")
                .unwrap_or(defaults.wal_flush_interval_ms),
            bounds_policy: parse_env("BOUNDS_POLICY").unwrap_or(defaults.bounds_policy),
            server_port: parse_env("SERVER_PORT").unwrap_or(defaults.server_port),
        }
    }

    /// Memory bound in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    /// Validation mode actually enforced; paranoia mode always validates strictly.
    pub fn effective_validation_mode(&self) -> ValidationMode {
        if self.paranoia_mode {
            ValidationMode::Strict
        } else {
            self.validation_mode
        }
    }

    /// Directory holding snapshot files, next to the WAL directory.
    pub fn snapshot_path(&self) -> PathBuf {
        match self.wal_path.parent() {
            Some(parent) => parent.join("snapshots"),
            None => PathBuf::from("snapshots"),
        }
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        if self.wal_flush_interval_ms == 0 {
            FlushPolicy::Always
        } else {
            FlushPolicy::Periodic(Duration::from_millis(self.wal_flush_interval_ms))
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            cleanup_interval: 30,
            num_shards: 16,
            enable_wal: true,
            wal_path: PathBuf::from("./data/wal"),
            max_entries: 100_000,
            max_memory_mb: 512,
            paranoia_mode: false,
            validation_mode: ValidationMode::Normal,
            snapshot_interval: 3600,
            snapshot_ttl: 24 * 3600,
            wal_ttl: 7 * 24 * 3600,
            balance_interval: 60,
            skew_threshold: 1.5,
            wal_flush_interval_ms: 1000,
            bounds_policy: BoundsPolicy::ClearShard,
            server_port: 3000,
        }
    }
}
