//! Sharded Cache Core
//!
//! Routes operations to shards through a virtual-slot table, enforces the
//! global entry/byte bounds and writes mutations to the WAL.
//!
//! Keys hash to one of `num_shards * SLOTS_PER_SHARD` virtual slots; the slot
//! never changes for a key. The slot → shard table starts as `slot % num_shards`
//! and is only changed by `migrate_slot`.
//!
//! A migrating slot has two owners. Entries move one at a time, each under
//! both shard locks, and any operation on a key of that slot first pulls the
//! key into the destination. The slot is repointed once the source is empty.
//! Route changes happen only while holding the shard locks they affect, so a
//! route re-read under those locks is current.
//!
//! Every logged entry carries the WAL sequence of its write. Replay compares
//! sequences, never timestamps, so log order alone decides which write wins.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::cache::entry::{current_timestamp_ms, entry_size};
use crate::cache::shard::Lookup;
use crate::cache::{CacheEntry, KeyValidator, Shard, ShardMetrics};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::incident::{IncidentEvent, IncidentKind, IncidentResponseCoordinator};
use crate::wal::{ReplayStats, WalOp, WalRecord, WriteAheadLog};

/// Virtual slots per shard; the unit the balancer migrates.
pub const SLOTS_PER_SHARD: usize = 64;

/// Hash used for slot assignment. Stable for the life of the process.
pub fn stable_hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

// == Shard Router ==
/// Where a slot lives: its owner, plus the destination while it migrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub owner: usize,
    pub migrating_to: Option<usize>,
}

impl Route {
    fn settled(owner: usize) -> Self {
        Self {
            owner,
            migrating_to: None,
        }
    }

    /// Shard that receives writes for the slot.
    pub fn current(&self) -> usize {
        self.migrating_to.unwrap_or(self.owner)
    }

    // Owner in the low half, destination + 1 in the high half (0 = none)
    fn pack(self) -> u64 {
        let target = self.migrating_to.map_or(0, |to| to as u64 + 1);
        (self.owner as u64) | (target << 32)
    }

    fn unpack(packed: u64) -> Self {
        Self {
            owner: (packed & 0xffff_ffff) as usize,
            migrating_to: match packed >> 32 {
                0 => None,
                target => Some((target - 1) as usize),
            },
        }
    }
}

/// Virtual slot → shard table. Reads are lock-free.
#[derive(Debug)]
pub struct ShardRouter {
    routes: Vec<AtomicU64>,
}

impl ShardRouter {
    pub fn new(num_shards: usize) -> Self {
        let routes = (0..num_shards * SLOTS_PER_SHARD)
            .map(|slot| AtomicU64::new(Route::settled(slot % num_shards).pack()))
            .collect();
        Self { routes }
    }

    pub fn slot_count(&self) -> usize {
        self.routes.len()
    }

    pub fn slot_for(&self, key: &str) -> usize {
        (stable_hash(key) % self.routes.len() as u64) as usize
    }

    pub fn route(&self, slot: usize) -> Route {
        Route::unpack(self.routes[slot].load(Ordering::Acquire))
    }

    pub fn owner(&self, slot: usize) -> usize {
        self.route(slot).owner
    }

    fn assign(&self, slot: usize, route: Route) {
        self.routes[slot].store(route.pack(), Ordering::Release);
    }
}

/// A shard plus the contention counters measured outside its lock.
struct ShardCell {
    shard: Mutex<Shard>,
    operations: AtomicU64,
    contentions: AtomicU64,
    wait_nanos: AtomicU64,
}

// == Sharded Cache Core ==
pub struct ShardedCacheCore {
    shards: Vec<ShardCell>,
    router: ShardRouter,
    validator: KeyValidator,
    wal: Option<Arc<WriteAheadLog>>,
    incidents: Arc<IncidentResponseCoordinator>,
    default_ttl: u64,
    max_entries: usize,
    max_bytes: usize,
    total_entries: AtomicUsize,
    total_bytes: AtomicUsize,
    degraded: AtomicBool,
    wal_replays: AtomicU64,
    records_replayed: AtomicU64,
}

impl ShardedCacheCore {
    // == Constructor ==
    pub fn new(
        config: &Config,
        wal: Option<Arc<WriteAheadLog>>,
        incidents: Arc<IncidentResponseCoordinator>,
    ) -> Self {
        let num_shards = config.num_shards.max(1);
        let shards = (0..num_shards)
            .map(|id| ShardCell {
                shard: Mutex::new(Shard::new(id)),
                operations: AtomicU64::new(0),
                contentions: AtomicU64::new(0),
                wait_nanos: AtomicU64::new(0),
            })
            .collect();

        Self {
            shards,
            router: ShardRouter::new(num_shards),
            validator: KeyValidator::new(config.effective_validation_mode()),
            wal,
            incidents,
            default_ttl: config.ttl_seconds,
            max_entries: config.max_entries,
            max_bytes: config.max_memory_bytes(),
            total_entries: AtomicUsize::new(0),
            total_bytes: AtomicUsize::new(0),
            degraded: AtomicBool::new(false),
            wal_replays: AtomicU64::new(0),
            records_replayed: AtomicU64::new(0),
        }
    }

    // == Get ==
    /// Returns the live value for `key`. Never writes the WAL.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.validator.validate(key)?;
        let slot = self.router.slot_for(key);
        let now = current_timestamp_ms();

        let (_, mut shard) = self.lock_route(slot, key);
        match shard.get(key, now) {
            Lookup::Hit(value) => Ok(Some(value)),
            Lookup::Expired(expired) => {
                self.release(1, expired.size_bytes);
                Ok(None)
            }
            Lookup::Miss => Ok(None),
        }
    }

    // == Set ==
    /// Stores `value` under `key`. `ttl_seconds = None` uses the configured default.
    ///
    /// Evicts from the target shard only when the global bounds would be
    /// exceeded. A WAL failure does not fail the call; it raises a
    /// `WalFailure` incident and marks the core degraded.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<()> {
        self.validator.validate(key)?;
        let ttl = ttl_seconds.unwrap_or(self.default_ttl);
        let size = entry_size(key, &value);
        let slot = self.router.slot_for(key);

        if size > self.max_bytes {
            // Clearing other entries cannot make room for this one
            return Err(self.reject_full(
                self.router.route(slot).current(),
                format!("entry of {size} bytes exceeds the {} byte bound", self.max_bytes),
                false,
            ));
        }

        let now = current_timestamp_ms();
        let (shard_id, mut shard) = self.lock_route(slot, key);
        if !self.make_room(&mut shard, key, size) {
            drop(shard);
            return Err(self.reject_full(
                shard_id,
                format!("no evictable headroom in shard {shard_id}"),
                true,
            ));
        }

        let logged = self.wal.as_ref().map(|wal| {
            wal.append(
                WalOp::Set {
                    key: key.to_string(),
                    value: value.clone(),
                    ttl,
                },
                now,
            )
        });
        let sequence = self.entry_sequence(logged.as_ref());
        let entry = CacheEntry::new(key.to_string(), value, ttl, now, shard_id, slot)
            .with_sequence(sequence);
        self.store(&mut shard, entry);
        shard.record_set();
        drop(shard);

        self.finish_wal(logged, key);
        Ok(())
    }

    // == Delete ==
    /// Removes `key`, returning whether a live entry was present.
    ///
    /// An expired entry still awaiting the sweep is dropped and reported absent.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.validator.validate(key)?;
        let slot = self.router.slot_for(key);
        let now = current_timestamp_ms();

        let (_, mut shard) = self.lock_route(slot, key);
        if let Some(expired) = shard.take_expired(key, now) {
            self.release(1, expired.size_bytes);
            return Ok(false);
        }
        let Some(removed) = shard.remove(key) else {
            return Ok(false);
        };
        self.release(1, removed.size_bytes);
        let logged = self.wal.as_ref().map(|wal| {
            wal.append(
                WalOp::Delete {
                    key: key.to_string(),
                },
                now,
            )
        });
        drop(shard);

        self.finish_wal(logged, key);
        Ok(true)
    }

    // == Clear ==
    /// Empties every shard and resets the global accounting.
    pub fn clear(&self) -> usize {
        let now = current_timestamp_ms();
        let mut shards = self.lock_all();
        let removed: usize = shards.iter_mut().map(|shard| shard.drain().len()).sum();
        self.total_entries.store(0, Ordering::Release);
        self.total_bytes.store(0, Ordering::Release);
        let logged = self.wal.as_ref().map(|wal| wal.append(WalOp::Clear, now));
        drop(shards);

        self.finish_wal(logged, "*");
        info!("Cache cleared: {} entries removed", removed);
        removed
    }

    /// Empties a single shard, logging a delete for each removed key.
    pub fn clear_shard(&self, shard_id: usize) -> usize {
        let Some(cell) = self.shards.get(shard_id) else {
            return 0;
        };
        let now = current_timestamp_ms();
        let mut shard = cell.shard.lock();
        let drained = shard.drain();
        let bytes: usize = drained.iter().map(|entry| entry.size_bytes).sum();
        self.release(drained.len(), bytes);

        let logged = self.wal.as_ref().map(|wal| {
            drained.iter().try_fold(wal.last_sequence(), |_, entry| {
                wal.append(
                    WalOp::Delete {
                        key: entry.key.clone(),
                    },
                    now,
                )
            })
        });
        drop(shard);

        self.finish_wal(logged, "*");
        info!("Shard {} cleared: {} entries removed", shard_id, drained.len());
        drained.len()
    }

    // == Sweep ==
    /// Removes expired entries from every shard, one shard lock at a time.
    pub fn sweep_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let mut removed = 0;
        for id in 0..self.shards.len() {
            let mut shard = self.lock_shard(id);
            let (count, bytes) = shard.sweep_expired(now);
            self.release(count, bytes);
            removed += count;
        }
        removed
    }

    // == Migration ==
    /// Moves every entry of `slot` to shard `to`, then repoints the slot.
    ///
    /// Each entry moves under its own acquisition of both shard locks
    /// (ascending id order), so no get/set waits longer than one move.
    /// Returns entries moved by this call; 0 if the slot is already owned by
    /// `to` or is migrating elsewhere. A migration already headed to `to` is resumed.
    pub fn migrate_slot(&self, slot: usize, to: usize) -> usize {
        if to >= self.shards.len() || slot >= self.router.slot_count() {
            return 0;
        }
        let from = loop {
            let route = self.router.route(slot);
            match route.migrating_to {
                Some(target) if target == to => break route.owner,
                Some(_) => return 0,
                None if route.owner == to => return 0,
                None => {}
            }
            let guards = self.lock_pair(route.owner, to, false);
            if self.router.route(slot) != route {
                continue;
            }
            self.router.assign(
                slot,
                Route {
                    owner: route.owner,
                    migrating_to: Some(to),
                },
            );
            drop(guards);
            break route.owner;
        };

        let migrating = Route {
            owner: from,
            migrating_to: Some(to),
        };
        let mut moved = 0;
        loop {
            let (mut source, mut target) = self.lock_pair(from, to, false);
            if self.router.route(slot) != migrating {
                break;
            }
            match source.next_key_in_slot(slot) {
                Some(key) => {
                    if self.move_entry(&mut source, &mut target, &key) {
                        moved += 1;
                    }
                }
                None => {
                    self.router.assign(slot, Route::settled(to));
                    break;
                }
            }
        }
        debug!("Migrated slot {} ({} entries) from shard {} to {}", slot, moved, from, to);
        moved
    }

    /// Entry count per slot currently owned by `shard_id`.
    pub fn slot_counts(&self, shard_id: usize) -> Vec<(usize, usize)> {
        let mut counts: Vec<(usize, usize)> = (0..self.router.slot_count())
            .filter(|slot| self.router.route(*slot) == Route::settled(shard_id))
            .map(|slot| (slot, 0))
            .collect();
        let per_slot = self.lock_shard(shard_id).slot_counts();
        for (slot, count) in counts.iter_mut() {
            *count = per_slot.get(slot).copied().unwrap_or(0);
        }
        counts
    }

    /// Entry count of every shard.
    pub fn shard_counts(&self) -> Vec<usize> {
        (0..self.shards.len())
            .map(|id| self.lock_shard(id).len())
            .collect()
    }

    // == Recovery ==
    /// Re-admits an entry loaded from a snapshot or WAL record without logging it.
    ///
    /// Skipped when an entry from the same or a later write is already present.
    /// An expired entry is not admitted but still supersedes older data for its key.
    pub fn admit_recovered(&self, mut entry: CacheEntry, now_ms: u64) -> bool {
        if self.validator.validate(&entry.key).is_err() {
            return false;
        }
        let slot = self.router.slot_for(&entry.key);
        let (shard_id, mut shard) = self.lock_route(slot, &entry.key);
        if shard
            .peek(&entry.key)
            .is_some_and(|existing| existing.sequence >= entry.sequence)
        {
            return false;
        }
        if entry.is_expired_at(now_ms) {
            if let Some(superseded) = shard.remove(&entry.key) {
                self.release(1, superseded.size_bytes);
            }
            return false;
        }
        if !self.make_room(&mut shard, &entry.key, entry.size_bytes) {
            warn!("Dropping recovered entry {}: no headroom", entry.key);
            return false;
        }
        entry.shard_id = shard_id;
        entry.slot = slot;
        self.store(&mut shard, entry);
        true
    }

    /// Applies one WAL record. Never overwrites data from a later write.
    pub fn apply_record(&self, record: &WalRecord, now_ms: u64) -> bool {
        match &record.op {
            WalOp::Set { key, value, ttl } => {
                let entry = CacheEntry::new(key.clone(), value.clone(), *ttl, record.timestamp, 0, 0)
                    .with_sequence(record.sequence);
                self.admit_recovered(entry, now_ms)
            }
            WalOp::Delete { key } => {
                let slot = self.router.slot_for(key);
                let (_, mut shard) = self.lock_route(slot, key);
                let superseded = shard
                    .peek(key)
                    .is_some_and(|existing| existing.sequence < record.sequence);
                if !superseded {
                    return false;
                }
                match shard.remove(key) {
                    Some(removed) => {
                        self.release(1, removed.size_bytes);
                        true
                    }
                    None => false,
                }
            }
            WalOp::Clear => {
                for id in 0..self.shards.len() {
                    let mut shard = self.lock_shard(id);
                    let (count, bytes) = shard.remove_logged_before(record.sequence);
                    self.release(count, bytes);
                }
                true
            }
        }
    }

    /// Replays the WAL from `after_sequence` into memory.
    pub fn replay_wal(&self, after_sequence: u64) -> Result<ReplayStats> {
        let Some(wal) = &self.wal else {
            return Ok(ReplayStats::default());
        };
        let now = current_timestamp_ms();
        let stats = wal.replay(after_sequence, |record| self.apply_record(record, now))?;
        self.wal_replays.fetch_add(1, Ordering::Relaxed);
        self.records_replayed
            .fetch_add(stats.replayed, Ordering::Relaxed);
        Ok(stats)
    }

    // == Consistency ==
    /// Compares the global counters with the shard contents and the bounds.
    pub fn verify_accounting(&self) -> std::result::Result<(), String> {
        let shards = self.lock_all();
        let entries: usize = shards.iter().map(|shard| shard.len()).sum();
        let bytes: usize = shards.iter().map(|shard| shard.bytes_used()).sum();
        let tracked_entries = self.total_entries.load(Ordering::Acquire);
        let tracked_bytes = self.total_bytes.load(Ordering::Acquire);
        drop(shards);

        if entries != tracked_entries || bytes != tracked_bytes {
            return Err(format!(
                "accounting drift: shards hold {entries} entries/{bytes} bytes, \
                 counters say {tracked_entries}/{tracked_bytes}"
            ));
        }
        if entries > self.max_entries || bytes > self.max_bytes {
            return Err(format!(
                "bounds exceeded: {entries} entries/{bytes} bytes over {}/{}",
                self.max_entries, self.max_bytes
            ));
        }
        Ok(())
    }

    // == Locking ==
    /// Locks every shard in ascending id order.
    pub fn lock_all(&self) -> Vec<MutexGuard<'_, Shard>> {
        (0..self.shards.len()).map(|id| self.lock_shard(id)).collect()
    }

    fn lock_shard(&self, id: usize) -> MutexGuard<'_, Shard> {
        self.lock_cell(id, true)
    }

    /// Locks shard `id`. Uncounted locks (migration) skip the operation counter.
    fn lock_cell(&self, id: usize, counted: bool) -> MutexGuard<'_, Shard> {
        let cell = &self.shards[id];
        if counted {
            cell.operations.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(guard) = cell.shard.try_lock() {
            return guard;
        }
        let started = Instant::now();
        let guard = cell.shard.lock();
        cell.contentions.fetch_add(1, Ordering::Relaxed);
        cell.wait_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        guard
    }

    /// Locks the shard that holds `key`, retrying if the route changed meanwhile.
    ///
    /// For a migrating slot both shards are locked and `key` is pulled into the
    /// destination first; only the destination guard is returned.
    fn lock_route(&self, slot: usize, key: &str) -> (usize, MutexGuard<'_, Shard>) {
        loop {
            let route = self.router.route(slot);
            match route.migrating_to {
                None => {
                    let guard = self.lock_shard(route.owner);
                    if self.router.route(slot) == route {
                        return (route.owner, guard);
                    }
                }
                Some(to) => {
                    let (mut source, mut target) = self.lock_pair(route.owner, to, true);
                    if self.router.route(slot) != route {
                        continue;
                    }
                    self.move_entry(&mut source, &mut target, key);
                    return (to, target);
                }
            }
        }
    }

    /// Returns guards for `(a, b)`, acquired in ascending id order.
    fn lock_pair(
        &self,
        a: usize,
        b: usize,
        counted: bool,
    ) -> (MutexGuard<'_, Shard>, MutexGuard<'_, Shard>) {
        if a < b {
            let first = self.lock_cell(a, counted);
            let second = self.lock_cell(b, counted);
            (first, second)
        } else {
            let second = self.lock_cell(b, counted);
            let first = self.lock_cell(a, counted);
            (first, second)
        }
    }

    /// Moves `key` from `source` to `target` if `source` still holds it.
    fn move_entry(&self, source: &mut Shard, target: &mut Shard, key: &str) -> bool {
        let Some(entry) = source.remove(key) else {
            return false;
        };
        if let Some(duplicate) = target.insert(entry) {
            self.release(1, duplicate.size_bytes);
        }
        true
    }

    // == Accounting ==
    /// Evicts from `shard` until an entry of `size` bytes for `key` fits the global bounds.
    fn make_room(&self, shard: &mut Shard, key: &str, size: usize) -> bool {
        let old_size = shard.peek(key).map(|entry| entry.size_bytes);
        let entries_needed = usize::from(old_size.is_none());
        let bytes_needed = size.saturating_sub(old_size.unwrap_or(0));

        while !self.try_reserve(entries_needed, bytes_needed) {
            match shard.evict_one(key) {
                Some(evicted) => {
                    self.release(1, evicted.size_bytes);
                    debug!("Evicted {} from shard {}", evicted.key, shard.id());
                }
                None => return false,
            }
        }
        true
    }

    /// Inserts an entry whose headroom was reserved by `make_room`.
    fn store(&self, shard: &mut Shard, entry: CacheEntry) {
        let size = entry.size_bytes;
        if let Some(old) = shard.insert(entry) {
            self.release(0, old.size_bytes.saturating_sub(size));
        }
    }

    fn try_reserve(&self, entries: usize, bytes: usize) -> bool {
        if entries > 0
            && self
                .total_entries
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n + entries <= self.max_entries).then_some(n + entries)
                })
                .is_err()
        {
            return false;
        }
        if bytes > 0
            && self
                .total_bytes
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| {
                    (b + bytes <= self.max_bytes).then_some(b + bytes)
                })
                .is_err()
        {
            self.release(entries, 0);
            return false;
        }
        true
    }

    fn release(&self, entries: usize, bytes: usize) {
        if entries > 0 {
            let _ = self
                .total_entries
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    Some(n.saturating_sub(entries))
                });
        }
        if bytes > 0 {
            let _ = self
                .total_bytes
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| {
                    Some(b.saturating_sub(bytes))
                });
        }
    }

    /// WAL sequence to tag an entry with. After a failed append the last
    /// logged sequence is used, so replaying older records cannot clobber it.
    fn entry_sequence(&self, logged: Option<&Result<u64>>) -> u64 {
        match (logged, &self.wal) {
            (Some(Ok(sequence)), _) => *sequence,
            (Some(Err(_)), Some(wal)) => wal.last_sequence(),
            _ => 0,
        }
    }

    /// Shard under the most pressure relative to the bounds, if any holds entries.
    ///
    /// Takes shard locks one at a time; callers must not hold any.
    pub fn fullest_shard(&self) -> Option<usize> {
        let max_entries = self.max_entries.max(1) as f64;
        let max_bytes = self.max_bytes.max(1) as f64;
        self.shards
            .iter()
            .enumerate()
            .filter_map(|(id, cell)| {
                let shard = cell.shard.lock();
                if shard.is_empty() {
                    return None;
                }
                let pressure = (shard.len() as f64 / max_entries)
                    .max(shard.bytes_used() as f64 / max_bytes);
                Some((id, pressure))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    // == Incident Plumbing ==
    /// Raises `CacheBoundsExceeded`. When `relievable`, the event names the
    /// fullest shard as `fullest_shard`. Called with no shard lock held.
    fn reject_full(&self, shard_id: usize, message: String, relievable: bool) -> CacheError {
        warn!("Rejecting set: {}", message);
        let mut event = IncidentEvent::new(IncidentKind::CacheBoundsExceeded, message.clone())
            .with_context("shard_id", shard_id);
        if let Some(fullest) = relievable.then(|| self.fullest_shard()).flatten() {
            event = event.with_context("fullest_shard", fullest);
        }
        self.incidents.raise(event);
        CacheError::CacheFull(message)
    }

    /// Commits a WAL append made under a shard lock; failures degrade instead of erroring.
    fn finish_wal(&self, logged: Option<Result<u64>>, key: &str) {
        let (Some(wal), Some(logged)) = (&self.wal, logged) else {
            return;
        };
        let outcome = logged.and_then(|sequence| wal.commit().map(|_| sequence));
        if let Err(e) = outcome {
            self.degraded.store(true, Ordering::Release);
            error!("WAL write failed for {}: {}", key, e);
            self.incidents.raise(
                IncidentEvent::new(IncidentKind::WalFailure, e.to_string()).with_context("key", key),
            );
        }
    }

    // == Accessors ==
    pub fn incidents(&self) -> &Arc<IncidentResponseCoordinator> {
        &self.incidents
    }

    pub fn wal(&self) -> Option<&Arc<WriteAheadLog>> {
        self.wal.as_ref()
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Shard that receives writes for `key`.
    pub fn shard_of(&self, key: &str) -> usize {
        self.router.route(self.router.slot_for(key)).current()
    }

    pub fn len(&self) -> usize {
        self.total_entries.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Acquire)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Release);
    }

    pub fn wal_replay_count(&self) -> u64 {
        self.wal_replays.load(Ordering::Relaxed)
    }

    pub fn records_replayed(&self) -> u64 {
        self.records_replayed.load(Ordering::Relaxed)
    }

    /// Total evictions across shards.
    pub fn evictions(&self) -> u64 {
        (0..self.shards.len())
            .map(|id| self.shards[id].shard.lock().stats().evictions)
            .sum()
    }

    /// Per-shard counters and contention figures.
    pub fn shard_metrics(&self) -> Vec<ShardMetrics> {
        self.shards
            .iter()
            .enumerate()
            .map(|(id, cell)| {
                let shard = cell.shard.lock();
                let stats = shard.stats();
                ShardMetrics {
                    shard_id: id,
                    entries: shard.len(),
                    bytes_used: shard.bytes_used(),
                    hits: stats.hits,
                    misses: stats.misses,
                    sets: stats.sets,
                    evictions: stats.evictions,
                    expirations: stats.expirations,
                    operations: cell.operations.load(Ordering::Relaxed),
                    lock_contentions: cell.contentions.load(Ordering::Relaxed),
                    lock_wait_micros: cell.wait_nanos.load(Ordering::Relaxed) / 1_000,
                }
            })
            .collect()
    }
}
