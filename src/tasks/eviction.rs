//! Adaptive Eviction Controller
//!
//! Periodic TTL sweep whose interval follows observed load.
//!
//! # Hysteresis
//! - High band: average latency > 0.5s or > 1000 inserts/s halves the interval (floor 5s)
//! - Low band: average latency < 0.1s and < 500 inserts/s adds 10s (ceiling 120s)
//! - Anything in between keeps the current interval
//!
//! Latency averages every foreground operation; the rate counts inserts only,
//! since only inserts add entries for the sweep to expire.
//!
//! The gap between the bands keeps the interval from oscillating when load
//! sits near a single threshold.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::ShardedCacheCore;
use crate::incident::{IncidentEvent, IncidentKind};

pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(120);
const INTERVAL_STEP: Duration = Duration::from_secs(10);

const HIGH_LATENCY_SECS: f64 = 0.5;
const HIGH_INSERTS_PER_SEC: f64 = 1000.0;
const LOW_LATENCY_SECS: f64 = 0.1;
const LOW_INSERTS_PER_SEC: f64 = 500.0;

/// Weight of the newest sample in the latency moving average.
const LATENCY_SMOOTHING: f64 = 0.2;

/// Evictions per second above which `HighEvictionRate` is raised.
pub const HIGH_EVICTION_RATE: f64 = 100.0;

/// Interval for the next cycle given the current load.
pub fn next_interval(current: Duration, avg_latency: Duration, inserts_per_sec: f64) -> Duration {
    let latency = avg_latency.as_secs_f64();
    if latency > HIGH_LATENCY_SECS || inserts_per_sec > HIGH_INSERTS_PER_SEC {
        (current / 2).max(MIN_SWEEP_INTERVAL)
    } else if latency < LOW_LATENCY_SECS && inserts_per_sec < LOW_INSERTS_PER_SEC {
        (current + INTERVAL_STEP).min(MAX_SWEEP_INTERVAL)
    } else {
        current
    }
}

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub evictions_per_sec: f64,
    pub next_interval: Duration,
}

struct ControllerState {
    interval: Duration,
    avg_latency_secs: f64,
    window_inserts: u64,
    window_start: Instant,
    last_evictions: u64,
    last_cycle: Instant,
}

// == Controller ==
pub struct AdaptiveEvictionController {
    core: Arc<ShardedCacheCore>,
    paranoia: bool,
    state: Mutex<ControllerState>,
    wake: Notify,
    cycles: AtomicU64,
}

impl AdaptiveEvictionController {
    pub fn new(core: Arc<ShardedCacheCore>, base_interval: Duration, paranoia: bool) -> Self {
        let now = Instant::now();
        let last_evictions = core.evictions();
        Self {
            core,
            paranoia,
            state: Mutex::new(ControllerState {
                interval: base_interval.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL),
                avg_latency_secs: 0.0,
                window_inserts: 0,
                window_start: now,
                last_evictions,
                last_cycle: now,
            }),
            wake: Notify::new(),
            cycles: AtomicU64::new(0),
        }
    }

    /// Feeds one foreground operation's latency into the moving average.
    pub fn record_operation(&self, latency: Duration) {
        let mut state = self.state.lock();
        state.avg_latency_secs = LATENCY_SMOOTHING * latency.as_secs_f64()
            + (1.0 - LATENCY_SMOOTHING) * state.avg_latency_secs;
    }

    /// Like `record_operation`, and also counts toward the insert rate.
    pub fn record_insert(&self, latency: Duration) {
        self.record_operation(latency);
        self.state.lock().window_inserts += 1;
    }

    pub fn current_interval(&self) -> Duration {
        self.state.lock().interval
    }

    pub fn average_latency(&self) -> Duration {
        Duration::from_secs_f64(self.state.lock().avg_latency_secs)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Recomputes the interval from the load seen since the last adjustment.
    pub fn adjust(&self) -> Duration {
        let mut state = self.state.lock();
        let elapsed = state.window_start.elapsed().max(Duration::from_millis(1));
        let inserts_per_sec = state.window_inserts as f64 / elapsed.as_secs_f64();
        let latency = Duration::from_secs_f64(state.avg_latency_secs);
        let next = next_interval(state.interval, latency, inserts_per_sec);

        if next != state.interval {
            debug!(
                "Sweep interval {:?} -> {:?} ({:.0} inserts/s, {:?} avg latency)",
                state.interval, next, inserts_per_sec, latency
            );
        }
        state.interval = next;
        state.window_inserts = 0;
        state.window_start = Instant::now();
        next
    }

    /// Drops the interval to the floor and cuts the current wait short.
    pub fn force_min_interval(&self) {
        self.state.lock().interval = MIN_SWEEP_INTERVAL;
        self.wake.notify_one();
        info!("Sweep interval forced to {:?}", MIN_SWEEP_INTERVAL);
    }

    // == Cycle ==
    /// Sweeps expired entries, checks the eviction rate and (in paranoia mode)
    /// the accounting, then adjusts the interval.
    pub fn run_cycle(&self) -> SweepReport {
        let expired = self.core.sweep_expired();
        if expired > 0 {
            info!("TTL sweep: removed {} expired entries", expired);
        } else {
            debug!("TTL sweep: no expired entries found");
        }

        let evictions = self.core.evictions();
        let evictions_per_sec = {
            let mut state = self.state.lock();
            let elapsed = state.last_cycle.elapsed().max(Duration::from_millis(1));
            let rate = evictions.saturating_sub(state.last_evictions) as f64 / elapsed.as_secs_f64();
            state.last_evictions = evictions;
            state.last_cycle = Instant::now();
            rate
        };

        if evictions_per_sec > HIGH_EVICTION_RATE {
            self.core.incidents().raise(
                IncidentEvent::new(
                    IncidentKind::HighEvictionRate,
                    format!("{evictions_per_sec:.0} evictions/s"),
                )
                .with_context("evictions_per_sec", format!("{evictions_per_sec:.1}")),
            );
        }

        if self.paranoia {
            if let Err(drift) = self.core.verify_accounting() {
                self.core
                    .incidents()
                    .raise(IncidentEvent::new(IncidentKind::MemoryError, drift));
            }
        }

        self.cycles.fetch_add(1, Ordering::Relaxed);
        SweepReport {
            expired,
            evictions_per_sec,
            next_interval: self.adjust(),
        }
    }

    // == Loop ==
    /// Runs cycles until `shutdown` flips. A forced interval change restarts the wait.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Starting adaptive TTL sweep with interval of {:?}",
                self.current_interval()
            );
            loop {
                let interval = self.current_interval();
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = self.wake.notified() => continue,
                    _ = shutdown.changed() => break,
                }
                self.run_cycle();
            }
            debug!("Adaptive TTL sweep stopped");
        })
    }
}
