//! shardcache - A resilient sharded in-process cache
//!
//! Sharded key/value storage with TTLs, global bounds, a write-ahead log,
//! periodic snapshots, adaptive TTL sweeping, shard balancing and
//! incident-driven self-healing.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod incident;
pub mod models;
pub mod service;
pub mod snapshot;
pub mod tasks;
pub mod wal;

pub use api::AppState;
pub use config::{BoundsPolicy, Config};
pub use error::{CacheError, Result};
pub use incident::{IncidentEvent, IncidentKind, IncidentResponseCoordinator};
pub use service::ResilientCache;
