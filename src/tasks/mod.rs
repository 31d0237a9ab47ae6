//! Background Tasks Module
//!
//! Loops that run while the cache is started.
//!
//! # Tasks
//! - Adaptive TTL sweep (`eviction`)
//! - Shard balancing (`balancer`)
//! - Snapshots, snapshot/WAL cleanup and WAL flushing (`maintenance`)
//!
//! Every loop watches the same shutdown channel; `BackgroundTasks` owns the handles.

mod balancer;
mod eviction;
mod maintenance;

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use balancer::{skew_ratio, ShardBalancer, MAX_MOVES_PER_CYCLE};
pub use eviction::{
    next_interval, AdaptiveEvictionController, SweepReport, HIGH_EVICTION_RATE,
    MAX_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL,
};
pub use maintenance::{spawn_cleanup_task, spawn_snapshot_task, spawn_wal_flush_task};

// == Background Tasks ==
/// Join handles of running loops plus their shared shutdown signal.
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// A receiver that changes to `true` when shutdown begins.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signals every loop and waits up to `timeout` for each; stragglers are aborted.
    pub async fn shutdown(self, timeout: Duration) {
        let _ = self.shutdown.send(true);
        for (name, handle) in self.handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => debug!("Background task {} stopped", name),
                Ok(Err(e)) => warn!("Background task {} ended abnormally: {}", name, e),
                Err(_) => {
                    abort.abort();
                    warn!("Background task {} did not stop within {:?}; aborted", name, timeout);
                }
            }
        }
        info!("Background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signals_loops() {
        let mut tasks = BackgroundTasks::new();
        let mut rx = tasks.subscribe();
        tasks.push(
            "waiter",
            tokio::spawn(async move {
                let _ = rx.changed().await;
            }),
        );
        assert_eq!(tasks.len(), 1);

        let started = std::time::Instant::now();
        tasks.shutdown(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stragglers() {
        let mut tasks = BackgroundTasks::new();
        let handle = tokio::spawn(std::future::pending::<()>());
        let abort = handle.abort_handle();
        tasks.push("stuck", handle);

        tasks.shutdown(Duration::from_millis(50)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(abort.is_finished());
    }
}
