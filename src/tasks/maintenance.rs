//! Maintenance Tasks
//!
//! Snapshot, cleanup and WAL flush loops. Failures become `SnapshotFailure`
//! or `WalFailure` incidents; the loops keep running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::ShardedCacheCore;
use crate::incident::{IncidentEvent, IncidentKind};
use crate::snapshot::SnapshotManager;

/// Spawns the periodic snapshot loop.
pub fn spawn_snapshot_task(
    core: Arc<ShardedCacheCore>,
    snapshots: Arc<SnapshotManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting snapshot task with interval of {:?}", interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
            if let Err(e) = snapshots.create_snapshot(&core) {
                core.incidents().raise(
                    IncidentEvent::new(IncidentKind::SnapshotFailure, e.to_string())
                        .with_context("stage", "create"),
                );
            }
        }
        debug!("Snapshot task stopped");
    })
}

/// Spawns the loop that expires old snapshots and covered WAL segments.
pub fn spawn_cleanup_task(
    core: Arc<ShardedCacheCore>,
    snapshots: Arc<SnapshotManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting snapshot cleanup task with interval of {:?}", interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
            let wal = core.wal().map(|wal| wal.as_ref());
            if let Err(e) = snapshots.cleanup(wal) {
                core.incidents().raise(
                    IncidentEvent::new(IncidentKind::SnapshotFailure, e.to_string())
                        .with_context("stage", "cleanup"),
                );
            }
        }
        debug!("Snapshot cleanup task stopped");
    })
}

/// Spawns the loop that pushes buffered WAL frames to disk during idle periods.
///
/// Returns `None` when the core has no WAL.
pub fn spawn_wal_flush_task(
    core: Arc<ShardedCacheCore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    core.wal()?;
    Some(tokio::spawn(async move {
        debug!("Starting WAL flush task with interval of {:?}", interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
            let Some(wal) = core.wal() else { break };
            if let Err(e) = wal.flush() {
                core.set_degraded(true);
                core.incidents().raise(
                    IncidentEvent::new(IncidentKind::WalFailure, e.to_string())
                        .with_context("stage", "flush"),
                );
            }
        }
        debug!("WAL flush task stopped");
    }))
}
