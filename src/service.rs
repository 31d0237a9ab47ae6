//! Resilient Cache Service
//!
//! Public facade tying the sharded core to the WAL, snapshots, background
//! loops and the default incident handlers.
//!
//! # Example
//! ```ignore
//! let cache = ResilientCache::open(Config::from_env())?;
//! cache.start();
//! cache.set("embedding:42", bytes, Some(600))?;
//! cache.stop().await?;
//! ```

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::cache::{detect_hot_shards, DetailedMetrics, ShardedCacheCore};
use crate::config::{BoundsPolicy, Config};
use crate::error::Result;
use crate::incident::{IncidentEvent, IncidentKind, IncidentResponseCoordinator};
use crate::snapshot::{SnapshotInfo, SnapshotManager};
use crate::tasks::{
    spawn_cleanup_task, spawn_snapshot_task, spawn_wal_flush_task, AdaptiveEvictionController,
    BackgroundTasks, ShardBalancer,
};
use crate::wal::{FlushPolicy, ReplayStats, WriteAheadLog};

/// How long `stop()` waits for each background loop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

// == Resilient Cache ==
/// Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct ResilientCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: Config,
    core: Arc<ShardedCacheCore>,
    snapshots: Arc<SnapshotManager>,
    controller: Arc<AdaptiveEvictionController>,
    balancer: Arc<ShardBalancer>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl ResilientCache {
    // == Constructor ==
    /// Builds the engine and, with the WAL enabled, restores the newest
    /// snapshot and replays the WAL after it.
    pub fn open(config: Config) -> Result<Self> {
        let incidents = Arc::new(IncidentResponseCoordinator::new());
        let wal = if config.enable_wal {
            Some(Arc::new(WriteAheadLog::open(
                &config.wal_path,
                config.flush_policy(),
            )?))
        } else {
            None
        };

        let core = Arc::new(ShardedCacheCore::new(&config, wal, incidents));
        let snapshots = Arc::new(SnapshotManager::new(
            config.snapshot_path(),
            Duration::from_secs(config.snapshot_ttl),
            Duration::from_secs(config.wal_ttl),
        ));
        let controller = Arc::new(AdaptiveEvictionController::new(
            core.clone(),
            Duration::from_secs(config.cleanup_interval),
            config.paranoia_mode,
        ));
        let balancer = Arc::new(ShardBalancer::new(core.clone(), config.skew_threshold));

        let cache = Self {
            inner: Arc::new(CacheInner {
                config,
                core,
                snapshots,
                controller,
                balancer,
                tasks: Mutex::new(None),
            }),
        };
        cache.recover()?;
        cache.register_default_handlers();

        info!(
            "Cache opened: {} shards, {} entries recovered, WAL {}",
            cache.inner.core.num_shards(),
            cache.inner.core.len(),
            if cache.inner.config.enable_wal { "enabled" } else { "disabled" }
        );
        Ok(cache)
    }

    fn recover(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.config.enable_wal {
            return Ok(());
        }
        let after = inner.snapshots.restore(&inner.core)?;
        let stats = inner.core.replay_wal(after)?;
        info!(
            "Recovery complete: snapshot through sequence {}, {} WAL records applied",
            after, stats.applied
        );
        Ok(())
    }

    // == Default Incident Handlers ==
    fn register_default_handlers(&self) {
        let incidents = self.inner.core.incidents();

        let weak = Arc::downgrade(&self.inner);
        incidents.register(IncidentKind::WalFailure, move |_| {
            with_inner(&weak, CacheInner::repair_wal)
        });

        let weak = Arc::downgrade(&self.inner);
        incidents.register(IncidentKind::MemoryError, move |_| {
            with_inner(&weak, |inner| {
                let removed = inner.core.clear();
                warn!("Memory error recovery cleared {} entries", removed);
                Ok(())
            })
        });

        let weak = Arc::downgrade(&self.inner);
        incidents.register(IncidentKind::HighEvictionRate, move |_| {
            with_inner(&weak, |inner| {
                inner.controller.force_min_interval();
                Ok(())
            })
        });

        let weak = Arc::downgrade(&self.inner);
        incidents.register(IncidentKind::CacheBoundsExceeded, move |event| {
            with_inner(&weak, |inner| inner.relieve_bounds(event))
        });

        incidents.register(IncidentKind::SnapshotFailure, |event| {
            error!("Snapshot failure: {}", event.message);
            Ok(())
        });
    }

    // == Operations ==
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let started = Instant::now();
        let result = self.inner.core.get(key);
        self.inner.controller.record_operation(started.elapsed());
        result
    }

    /// `ttl_seconds = None` uses the configured default; `Some(0)` never expires.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.core.set(key, value, ttl_seconds);
        self.inner.controller.record_insert(started.elapsed());
        result
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let started = Instant::now();
        let result = self.inner.core.delete(key);
        self.inner.controller.record_operation(started.elapsed());
        result
    }

    pub fn clear(&self) -> usize {
        self.inner.core.clear()
    }

    pub fn size(&self) -> usize {
        self.inner.core.len()
    }

    /// Writes a snapshot now. Failures are also raised as `SnapshotFailure`.
    pub fn create_backup_snapshot(&self) -> Result<SnapshotInfo> {
        self.inner
            .snapshots
            .create_snapshot(&self.inner.core)
            .map_err(|e| {
                self.inner.core.incidents().raise(
                    IncidentEvent::new(IncidentKind::SnapshotFailure, e.to_string())
                        .with_context("stage", "backup"),
                );
                e
            })
    }

    /// Replays WAL records newer than the latest snapshot.
    pub fn replay_wal(&self) -> Result<ReplayStats> {
        let after = self.inner.snapshots.latest_sequence()?;
        self.inner.core.replay_wal(after)
    }

    pub fn get_hot_shards(&self) -> Vec<usize> {
        detect_hot_shards(&self.inner.core.shard_metrics())
    }

    pub fn get_detailed_metrics(&self) -> DetailedMetrics {
        let inner = &self.inner;
        let core = &inner.core;
        let mut metrics = DetailedMetrics::from_shards(core.shard_metrics());
        metrics.total_entries = core.len();
        metrics.total_bytes = core.total_bytes();
        metrics.max_entries = core.max_entries();
        metrics.max_bytes = core.max_bytes();
        metrics.rebalance_count = inner.balancer.rebalance_count();
        metrics.wal_replay_count = core.wal_replay_count();
        metrics.wal_records_replayed = core.records_replayed();
        metrics.wal_last_sequence = core.wal().map(|wal| wal.last_sequence());
        metrics.degraded = core.is_degraded();
        metrics.sweep_interval_secs = inner.controller.current_interval().as_secs_f64();
        metrics.snapshots_created = inner.snapshots.snapshots_created();
        metrics.incidents = core.incidents().counts();
        metrics
    }

    // == Lifecycle ==
    /// Spawns the background loops. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut slot = self.inner.tasks.lock();
        if slot.is_some() {
            warn!("Cache already started");
            return;
        }

        let inner = &self.inner;
        let config = &inner.config;
        let mut tasks = BackgroundTasks::new();

        tasks.push("eviction", inner.controller.clone().spawn(tasks.subscribe()));
        tasks.push(
            "balancer",
            inner
                .balancer
                .clone()
                .spawn(Duration::from_secs(config.balance_interval), tasks.subscribe()),
        );
        let snapshot_interval = Duration::from_secs(config.snapshot_interval);
        tasks.push(
            "snapshot",
            spawn_snapshot_task(
                inner.core.clone(),
                inner.snapshots.clone(),
                snapshot_interval,
                tasks.subscribe(),
            ),
        );
        tasks.push(
            "cleanup",
            spawn_cleanup_task(
                inner.core.clone(),
                inner.snapshots.clone(),
                snapshot_interval,
                tasks.subscribe(),
            ),
        );
        if let FlushPolicy::Periodic(interval) = config.flush_policy() {
            if let Some(handle) =
                spawn_wal_flush_task(inner.core.clone(), interval, tasks.subscribe())
            {
                tasks.push("wal-flush", handle);
            }
        }

        info!("Started {} background tasks", tasks.len());
        *slot = Some(tasks);
    }

    pub async fn stop(&self) -> Result<()> {
        self.stop_with_timeout(DEFAULT_STOP_TIMEOUT).await
    }

    /// Stops the background loops, then makes the WAL durable.
    pub async fn stop_with_timeout(&self, timeout: Duration) -> Result<()> {
        let tasks = self.inner.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.shutdown(timeout).await;
        }
        if let Some(wal) = self.inner.core.wal() {
            wal.sync()?;
        }
        info!("Cache stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.tasks.lock().is_some()
    }

    // == Accessors ==
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn core(&self) -> &Arc<ShardedCacheCore> {
        &self.inner.core
    }

    pub fn incidents(&self) -> &Arc<IncidentResponseCoordinator> {
        self.inner.core.incidents()
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.inner.snapshots
    }

    pub fn controller(&self) -> &Arc<AdaptiveEvictionController> {
        &self.inner.controller
    }

    pub fn balancer(&self) -> &Arc<ShardBalancer> {
        &self.inner.balancer
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.core.is_degraded()
    }
}

impl CacheInner {
    /// Starts a fresh WAL segment and replays from the newest snapshot.
    fn repair_wal(&self) -> anyhow::Result<()> {
        let Some(wal) = self.core.wal() else {
            return Ok(());
        };
        let sequence = wal.reopen().context("reopening WAL segment")?;
        let after = self
            .snapshots
            .latest_sequence()
            .context("locating latest snapshot")?;
        let stats = self.core.replay_wal(after).context("read-repair replay")?;
        self.core.set_degraded(false);
        info!(
            "WAL repaired at sequence {}: {} records replayed after {}",
            sequence, stats.replayed, after
        );
        Ok(())
    }

    /// Frees headroom after a rejected set. Events without a `fullest_shard`
    /// (oversized entries, empty cache) have nothing worth clearing.
    fn relieve_bounds(&self, event: &IncidentEvent) -> anyhow::Result<()> {
        let Some(fullest) = event.context_value("fullest_shard") else {
            info!("Bounds incident with no shard to relieve: {}", event.message);
            return Ok(());
        };
        let removed = match self.config.bounds_policy {
            BoundsPolicy::ClearAll => self.core.clear(),
            BoundsPolicy::ClearShard => {
                let shard_id: usize = fullest.parse().context("malformed fullest_shard")?;
                self.core.clear_shard(shard_id)
            }
        };
        warn!("Bounds recovery removed {} entries", removed);
        Ok(())
    }
}

fn with_inner<F>(weak: &Weak<CacheInner>, action: F) -> anyhow::Result<()>
where
    F: FnOnce(&CacheInner) -> anyhow::Result<()>,
{
    match weak.upgrade() {
        Some(inner) => action(&inner),
        None => Ok(()),
    }
}
