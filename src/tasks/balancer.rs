//! Shard Balancer
//!
//! Moves virtual slots from the most loaded shard to the least loaded one
//! when the entry distribution is skewed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::ShardedCacheCore;

/// Upper bound on slot migrations per balancing pass.
pub const MAX_MOVES_PER_CYCLE: usize = 64;

/// max/avg entry count; 1.0 for an empty or perfectly even cache.
pub fn skew_ratio(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 || counts.is_empty() {
        return 1.0;
    }
    let max = counts.iter().copied().max().unwrap_or(0);
    max as f64 / (total as f64 / counts.len() as f64)
}

pub struct ShardBalancer {
    core: Arc<ShardedCacheCore>,
    skew_threshold: f64,
    rebalances: AtomicU64,
    slots_moved: AtomicU64,
}

impl ShardBalancer {
    pub fn new(core: Arc<ShardedCacheCore>, skew_threshold: f64) -> Self {
        Self {
            core,
            skew_threshold: skew_threshold.max(1.0),
            rebalances: AtomicU64::new(0),
            slots_moved: AtomicU64::new(0),
        }
    }

    pub fn skew(&self) -> f64 {
        skew_ratio(&self.core.shard_counts())
    }

    /// Passes that migrated at least one slot.
    pub fn rebalance_count(&self) -> u64 {
        self.rebalances.load(Ordering::Relaxed)
    }

    pub fn slots_moved(&self) -> u64 {
        self.slots_moved.load(Ordering::Relaxed)
    }

    // == Rebalance ==
    /// One balancing pass. Returns the number of slots migrated.
    ///
    /// Each move takes the largest non-empty slot of the busiest shard that
    /// fits in half the gap to the idlest shard, so no move overshoots.
    pub fn rebalance_once(&self) -> usize {
        let mut moved = 0;
        for _ in 0..MAX_MOVES_PER_CYCLE {
            let counts = self.core.shard_counts();
            if skew_ratio(&counts) <= self.skew_threshold {
                break;
            }
            let Some((busiest, max)) = counts.iter().copied().enumerate().max_by_key(|(_, c)| *c)
            else {
                break;
            };
            let Some((idlest, min)) = counts.iter().copied().enumerate().min_by_key(|(_, c)| *c)
            else {
                break;
            };
            let budget = (max - min) / 2;

            let candidate = self
                .core
                .slot_counts(busiest)
                .into_iter()
                .filter(|(_, count)| *count > 0 && *count <= budget)
                .max_by_key(|(_, count)| *count);
            let Some((slot, _)) = candidate else {
                debug!("No slot of shard {} fits a gap of {}", busiest, max - min);
                break;
            };

            self.core.migrate_slot(slot, idlest);
            moved += 1;
        }

        if moved > 0 {
            self.rebalances.fetch_add(1, Ordering::Relaxed);
            self.slots_moved.fetch_add(moved as u64, Ordering::Relaxed);
            info!("Rebalanced {} slots; skew now {:.2}", moved, self.skew());
        }
        moved
    }

    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting shard balancer with interval of {:?}", interval);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
                self.rebalance_once();
            }
            debug!("Shard balancer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::incident::IncidentResponseCoordinator;

    fn core(num_shards: usize) -> Arc<ShardedCacheCore> {
        let config = Config {
            num_shards,
            ttl_seconds: 0,
            ..Config::default()
        };
        Arc::new(ShardedCacheCore::new(
            &config,
            None,
            Arc::new(IncidentResponseCoordinator::new()),
        ))
    }

    #[test]
    fn test_skew_ratio() {
        assert_eq!(skew_ratio(&[]), 1.0);
        assert_eq!(skew_ratio(&[0, 0]), 1.0);
        assert_eq!(skew_ratio(&[5, 5]), 1.0);
        assert_eq!(skew_ratio(&[30, 10]), 1.5);
    }

    #[test]
    fn test_balanced_cache_is_left_alone() {
        let core = core(4);
        for i in 0..400 {
            core.set(&format!("key-{i}"), b"v".to_vec(), None).unwrap();
        }
        let balancer = ShardBalancer::new(core, 3.0);
        assert_eq!(balancer.rebalance_once(), 0);
        assert_eq!(balancer.rebalance_count(), 0);
    }

    #[test]
    fn test_skewed_cache_settles_under_threshold() {
        let core = core(4);
        for slot in 0..core.router().slot_count() {
            core.migrate_slot(slot, 0);
        }
        for i in 0..2000 {
            core.set(&format!("key-{i}"), b"v".to_vec(), None).unwrap();
        }
        let balancer = ShardBalancer::new(core.clone(), 1.5);
        assert!(balancer.skew() > 1.5);

        let mut passes = 0;
        while balancer.rebalance_once() > 0 {
            passes += 1;
            assert!(passes < 100, "balancer did not settle");
        }

        assert!(balancer.skew() <= 1.5);
        assert!(balancer.rebalance_count() >= 1);
        assert_eq!(core.len(), 2000);
        for i in 0..2000 {
            assert!(core.get(&format!("key-{i}")).unwrap().is_some());
        }
        assert!(core.verify_accounting().is_ok());
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let balancer = Arc::new(ShardBalancer::new(core(2), 1.5));
        let (tx, rx) = watch::channel(false);
        let handle = balancer.spawn(Duration::from_secs(60), rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }
}
