//! Incident Response Module
//!
//! Registry of recovery handlers keyed by incident kind. Components raise
//! incidents instead of propagating durability faults; handlers run
//! synchronously on the raising thread, and their failures are logged and
//! never reach the component that raised the incident.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info, warn};

/// Events retained for inspection.
pub const INCIDENT_HISTORY_LIMIT: usize = 128;

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

// == Incident Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum IncidentKind {
    /// A WAL append or flush failed
    WalFailure,
    /// Memory accounting is inconsistent or over its ceiling
    MemoryError,
    /// Bounds-driven evictions are happening too fast
    HighEvictionRate,
    /// A set could not be admitted under the global bounds
    CacheBoundsExceeded,
    /// Snapshot creation or cleanup failed
    SnapshotFailure,
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// == Incident Event ==
#[derive(Debug, Clone, Serialize)]
pub struct IncidentEvent {
    pub kind: IncidentKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub context: BTreeMap<String, String>,
}

impl IncidentEvent {
    pub fn new(kind: IncidentKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}

// == Handler Trait ==
/// A recovery action. Errors are logged by the coordinator.
pub trait IncidentHandler: Send + Sync {
    fn handle(&self, event: &IncidentEvent) -> anyhow::Result<()>;
}

impl<F> IncidentHandler for F
where
    F: Fn(&IncidentEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &IncidentEvent) -> anyhow::Result<()> {
        self(event)
    }
}

// == Coordinator ==
#[derive(Default)]
pub struct IncidentResponseCoordinator {
    handlers: RwLock<HashMap<IncidentKind, Vec<Arc<dyn IncidentHandler>>>>,
    history: Mutex<VecDeque<IncidentEvent>>,
    counts: Mutex<HashMap<IncidentKind, u64>>,
}

impl IncidentResponseCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a closure handler for `kind`. Handlers run in registration order.
    pub fn register<F>(&self, kind: IncidentKind, handler: F)
    where
        F: Fn(&IncidentEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_handler(kind, Arc::new(handler));
    }

    pub fn register_handler(&self, kind: IncidentKind, handler: Arc<dyn IncidentHandler>) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Removes every handler registered for `kind`.
    pub fn unregister_all(&self, kind: IncidentKind) {
        self.handlers.write().remove(&kind);
    }

    pub fn handler_count(&self, kind: IncidentKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    // == Raise ==
    /// Records the event and runs its handlers. Returns how many handlers succeeded.
    ///
    /// Incidents raised from inside a handler are recorded but not dispatched.
    pub fn raise(&self, event: IncidentEvent) -> usize {
        warn!(kind = %event.kind, context = ?event.context, "Incident: {}", event.message);
        self.record(&event);

        if DISPATCHING.with(Cell::get) {
            info!(kind = %event.kind, "Incident raised during recovery; not dispatched");
            return 0;
        }

        let handlers = self
            .handlers
            .read()
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        DISPATCHING.with(|flag| flag.set(true));
        let mut succeeded = 0;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&event))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => warn!(kind = %event.kind, "Incident handler failed: {:#}", e),
                Err(_) => error!(kind = %event.kind, "Incident handler panicked"),
            }
        }
        DISPATCHING.with(|flag| flag.set(false));
        succeeded
    }

    fn record(&self, event: &IncidentEvent) {
        *self.counts.lock().entry(event.kind).or_insert(0) += 1;
        let mut history = self.history.lock();
        if history.len() == INCIDENT_HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(event.clone());
    }

    /// Times `kind` has been raised.
    pub fn count(&self, kind: IncidentKind) -> u64 {
        self.counts.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Raise counts keyed by kind name.
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.counts
            .lock()
            .iter()
            .map(|(kind, count)| (kind.to_string(), *count))
            .collect()
    }

    /// Most recent events, oldest first.
    pub fn recent(&self) -> Vec<IncidentEvent> {
        self.history.lock().iter().cloned().collect()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handlers_dispatched_by_kind() {
        let coordinator = IncidentResponseCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        coordinator.register(IncidentKind::MemoryError, move |_: &IncidentEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(coordinator.raise(IncidentEvent::new(IncidentKind::MemoryError, "oom")), 1);
        assert_eq!(coordinator.raise(IncidentEvent::new(IncidentKind::WalFailure, "io")), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.count(IncidentKind::WalFailure), 1);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_contained() {
        let coordinator = IncidentResponseCoordinator::new();
        let after = Arc::new(AtomicUsize::new(0));
        let seen = after.clone();
        coordinator.register(IncidentKind::WalFailure, |_: &IncidentEvent| {
            anyhow::bail!("replay failed")
        });
        coordinator.register(IncidentKind::WalFailure, |_: &IncidentEvent| -> anyhow::Result<()> {
            panic!("handler bug")
        });
        coordinator.register(IncidentKind::WalFailure, move |_: &IncidentEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let succeeded = coordinator.raise(IncidentEvent::new(IncidentKind::WalFailure, "disk"));
        assert_eq!(succeeded, 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_raise_is_recorded_not_dispatched() {
        let coordinator = Arc::new(IncidentResponseCoordinator::new());
        let inner = coordinator.clone();
        coordinator.register(IncidentKind::MemoryError, move |_: &IncidentEvent| {
            inner.raise(IncidentEvent::new(IncidentKind::MemoryError, "again"));
            Ok(())
        });

        assert_eq!(coordinator.raise(IncidentEvent::new(IncidentKind::MemoryError, "first")), 1);
        assert_eq!(coordinator.count(IncidentKind::MemoryError), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let coordinator = IncidentResponseCoordinator::new();
        for i in 0..(INCIDENT_HISTORY_LIMIT + 10) {
            coordinator.raise(
                IncidentEvent::new(IncidentKind::HighEvictionRate, "busy").with_context("n", i),
            );
        }
        let recent = coordinator.recent();
        assert_eq!(recent.len(), INCIDENT_HISTORY_LIMIT);
        assert_eq!(recent[0].context_value("n"), Some("10"));
        assert_eq!(
            coordinator.counts().get("HighEvictionRate"),
            Some(&((INCIDENT_HISTORY_LIMIT + 10) as u64))
        );
    }

    #[test]
    fn test_unregister_all() {
        let coordinator = IncidentResponseCoordinator::new();
        coordinator.register(IncidentKind::SnapshotFailure, |_: &IncidentEvent| Ok(()));
        assert_eq!(coordinator.handler_count(IncidentKind::SnapshotFailure), 1);
        coordinator.unregister_all(IncidentKind::SnapshotFailure);
        assert_eq!(coordinator.handler_count(IncidentKind::SnapshotFailure), 0);
    }
}
