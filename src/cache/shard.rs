//! Shard Module
//!
//! A single keyspace partition. Not thread-safe on its own; the core wraps each shard in a mutex.

use std::collections::{HashMap, HashSet};

use crate::cache::{CacheEntry, ShardStats};

/// Outcome of a shard lookup.
#[derive(Debug)]
pub enum Lookup {
    /// Live entry; value cloned out of the shard
    Hit(Vec<u8>),
    /// Entry existed but had expired; it has been removed
    Expired(CacheEntry),
    Miss,
}

// == Shard ==
#[derive(Debug)]
pub struct Shard {
    id: usize,
    entries: HashMap<String, CacheEntry>,
    /// Keys held per virtual slot; lets migration pick entries without a scan
    slots: HashMap<usize, HashSet<String>>,
    stats: ShardStats,
}

impl Shard {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            entries: HashMap::new(),
            slots: HashMap::new(),
            stats: ShardStats::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    // == Get ==
    /// Looks up a key, lazily dropping it if expired. Records a hit or miss.
    pub fn get(&mut self, key: &str, now_ms: u64) -> Lookup {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired_at(now_ms) => {
                self.stats.record_miss();
                match self.remove(key) {
                    Some(expired) => {
                        self.stats.record_expirations(1);
                        Lookup::Expired(expired)
                    }
                    None => Lookup::Miss,
                }
            }
            Some(entry) => {
                let value = entry.value.clone();
                self.stats.record_hit();
                Lookup::Hit(value)
            }
            None => {
                self.stats.record_miss();
                Lookup::Miss
            }
        }
    }

    /// Reads an entry without touching counters or expiry.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    // == Insert ==
    /// Stores an entry, returning the one it replaced.
    ///
    /// Does not count as a set; migrations and recovery insert too.
    pub fn insert(&mut self, mut entry: CacheEntry) -> Option<CacheEntry> {
        entry.shard_id = self.id;
        self.stats.bytes_used += entry.size_bytes;
        self.slots
            .entry(entry.slot)
            .or_default()
            .insert(entry.key.clone());
        let old = self.entries.insert(entry.key.clone(), entry);
        if let Some(old) = &old {
            self.stats.bytes_used -= old.size_bytes;
        }
        old
    }

    /// Counts a client write.
    pub fn record_set(&mut self) {
        self.stats.record_set();
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.stats.bytes_used -= removed.size_bytes;
        unindex(&mut self.slots, removed.slot, key);
        Some(removed)
    }

    /// Drops `key` if it has expired at `now_ms`, counting the expiration.
    pub fn take_expired(&mut self, key: &str, now_ms: u64) -> Option<CacheEntry> {
        if !self.entries.get(key)?.is_expired_at(now_ms) {
            return None;
        }
        let expired = self.remove(key)?;
        self.stats.record_expirations(1);
        Some(expired)
    }

    // == Sweep Expired ==
    /// Removes every entry with `expire_at <= now`. Returns (count, bytes) freed.
    pub fn sweep_expired(&mut self, now_ms: u64) -> (usize, usize) {
        let mut freed_bytes = 0;
        let before = self.entries.len();
        let slots = &mut self.slots;
        self.entries.retain(|key, entry| {
            if entry.is_expired_at(now_ms) {
                freed_bytes += entry.size_bytes;
                unindex(slots, entry.slot, key);
                false
            } else {
                true
            }
        });
        let removed = before - self.entries.len();
        self.stats.bytes_used -= freed_bytes;
        self.stats.record_expirations(removed);
        (removed, freed_bytes)
    }

    // == Evict One ==
    /// Evicts the entry closest to expiry (entries without TTL last, oldest first among ties),
    /// never the key being written.
    pub fn evict_one(&mut self, except: &str) -> Option<CacheEntry> {
        let victim = self
            .entries
            .values()
            .filter(|entry| entry.key != except)
            .min_by_key(|entry| (entry.expire_at.unwrap_or(u64::MAX), entry.created_at))
            .map(|entry| entry.key.clone())?;
        let evicted = self.remove(&victim)?;
        self.stats.record_eviction();
        Some(evicted)
    }

    /// Any key of `slot` still held here.
    pub fn next_key_in_slot(&self, slot: usize) -> Option<String> {
        self.slots.get(&slot)?.iter().next().cloned()
    }

    /// Removes every entry written before WAL sequence `sequence`. Returns (count, bytes) freed.
    pub fn remove_logged_before(&mut self, sequence: u64) -> (usize, usize) {
        let mut freed_bytes = 0;
        let before = self.entries.len();
        let slots = &mut self.slots;
        self.entries.retain(|key, entry| {
            if entry.sequence < sequence {
                freed_bytes += entry.size_bytes;
                unindex(slots, entry.slot, key);
                false
            } else {
                true
            }
        });
        self.stats.bytes_used -= freed_bytes;
        (before - self.entries.len(), freed_bytes)
    }

    // == Clear ==
    /// Drops every entry, returning them. Counters other than bytes are kept.
    pub fn drain(&mut self) -> Vec<CacheEntry> {
        self.stats.bytes_used = 0;
        self.slots.clear();
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Entry count per virtual slot held by this shard.
    pub fn slot_counts(&self) -> HashMap<usize, usize> {
        self.slots
            .iter()
            .map(|(slot, keys)| (*slot, keys.len()))
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn stats(&self) -> &ShardStats {
        &self.stats
    }

    pub fn bytes_used(&self) -> usize {
        self.stats.bytes_used
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn unindex(slots: &mut HashMap<usize, HashSet<String>>, slot: usize, key: &str) {
    if let Some(keys) = slots.get_mut(&slot) {
        keys.remove(key);
        if keys.is_empty() {
            slots.remove(&slot);
        }
    }
}
