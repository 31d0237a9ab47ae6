//! Snapshot Module
//!
//! Point-in-time copies of the cache that bound WAL replay time.
//!
//! Files are named `snapshot-<unix_ms>-<wal_sequence>.json` and are written
//! through a temporary file and a rename, so a listed snapshot is always complete.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, ShardedCacheCore};
use crate::error::{CacheError, Result};
use crate::wal::WriteAheadLog;

const SNAPSHOT_PREFIX: &str = "snapshot-";
const SNAPSHOT_SUFFIX: &str = ".json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub total_entries: usize,
    pub total_bytes: usize,
    /// Last WAL sequence reflected in this snapshot
    pub wal_sequence: u64,
    pub num_shards: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    /// Live entries grouped by the shard that held them
    pub shards: Vec<Vec<CacheEntry>>,
}

/// A snapshot file on disk, described by its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub timestamp_ms: u64,
    pub wal_sequence: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub snapshots_removed: usize,
    pub segments_removed: usize,
}

// == Snapshot Manager ==
pub struct SnapshotManager {
    dir: PathBuf,
    snapshot_ttl: Duration,
    wal_ttl: Duration,
    write_lock: Mutex<()>,
    created: AtomicU64,
}

impl SnapshotManager {
    pub fn new(dir: impl Into<PathBuf>, snapshot_ttl: Duration, wal_ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            snapshot_ttl,
            wal_ttl,
            write_lock: Mutex::new(()),
            created: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshots_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Copies every live entry plus the current WAL sequence.
    ///
    /// Holds all shard locks (ascending order) for the duration of the copy.
    pub fn capture(core: &ShardedCacheCore) -> Snapshot {
        let now = current_timestamp_ms();
        let shards = core.lock_all();
        let wal_sequence = core.wal().map_or(0, |wal| wal.last_sequence());
        let copied: Vec<Vec<CacheEntry>> = shards
            .iter()
            .map(|shard| {
                shard
                    .entries()
                    .filter(|entry| !entry.is_expired_at(now))
                    .cloned()
                    .collect()
            })
            .collect();
        drop(shards);

        let total_entries: usize = copied.iter().map(Vec::len).sum();
        let total_bytes: usize = copied.iter().flatten().map(|entry| entry.size_bytes).sum();
        Snapshot {
            metadata: SnapshotMetadata {
                created_at: Utc::now(),
                total_entries,
                total_bytes,
                wal_sequence,
                num_shards: copied.len(),
            },
            shards: copied,
        }
    }

    // == Create ==
    /// Writes a snapshot of `core` and rotates the WAL so older segments become prunable.
    pub fn create_snapshot(&self, core: &ShardedCacheCore) -> Result<SnapshotInfo> {
        let _writer = self.write_lock.lock();
        let snapshot = Self::capture(core);
        let timestamp_ms = snapshot.metadata.created_at.timestamp_millis().max(0) as u64;
        let info = SnapshotInfo {
            path: self.dir.join(snapshot_file_name(timestamp_ms, snapshot.metadata.wal_sequence)),
            timestamp_ms,
            wal_sequence: snapshot.metadata.wal_sequence,
        };

        self.write_atomically(&info.path, &snapshot)
            .map_err(|e| CacheError::Snapshot(format!("writing {}: {e}", info.path.display())))?;
        self.created.fetch_add(1, Ordering::Relaxed);

        if let Some(wal) = core.wal() {
            if let Err(e) = wal.rotate() {
                warn!("WAL rotation after snapshot failed: {}", e);
            }
        }

        info!(
            "Snapshot written: {} entries, {} bytes, WAL sequence {}",
            snapshot.metadata.total_entries,
            snapshot.metadata.total_bytes,
            snapshot.metadata.wal_sequence
        );
        Ok(info)
    }

    fn write_atomically(&self, path: &Path, snapshot: &Snapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec(snapshot)?;
        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    // == Listing ==
    /// Snapshot files, oldest first.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some((timestamp_ms, wal_sequence)) = parse_file_name(&path) {
                snapshots.push(SnapshotInfo {
                    path,
                    timestamp_ms,
                    wal_sequence,
                });
            }
        }
        snapshots.sort_by_key(|info| (info.timestamp_ms, info.wal_sequence));
        Ok(snapshots)
    }

    pub fn load(path: &Path) -> Result<Snapshot> {
        let data = fs::read(path)
            .map_err(|e| CacheError::Snapshot(format!("reading {}: {e}", path.display())))?;
        serde_json::from_slice(&data)
            .map_err(|e| CacheError::Snapshot(format!("decoding {}: {e}", path.display())))
    }

    /// Newest snapshot that can be decoded; unreadable ones are skipped with a warning.
    pub fn latest(&self) -> Result<Option<(SnapshotInfo, Snapshot)>> {
        for info in self.list()?.into_iter().rev() {
            match Self::load(&info.path) {
                Ok(snapshot) => return Ok(Some((info, snapshot))),
                Err(e) => warn!("Ignoring unreadable snapshot: {}", e),
            }
        }
        Ok(None)
    }

    /// WAL sequence covered by the newest snapshot file, 0 if there is none.
    pub fn latest_sequence(&self) -> Result<u64> {
        Ok(self.list()?.last().map_or(0, |info| info.wal_sequence))
    }

    // == Restore ==
    /// Loads the newest snapshot into `core`. Returns the WAL sequence to replay after.
    pub fn restore(&self, core: &ShardedCacheCore) -> Result<u64> {
        let Some((info, snapshot)) = self.latest()? else {
            debug!("No snapshot to restore from {}", self.dir.display());
            return Ok(0);
        };

        let now = current_timestamp_ms();
        let restored = snapshot
            .shards
            .into_iter()
            .flatten()
            .filter(|entry| core.admit_recovered(entry.clone(), now))
            .count();
        info!(
            "Restored {} of {} entries from {}",
            restored,
            snapshot.metadata.total_entries,
            info.path.display()
        );
        Ok(snapshot.metadata.wal_sequence)
    }

    // == Cleanup ==
    /// Deletes snapshots older than the snapshot TTL (always keeping the newest)
    /// and WAL segments covered by the newest snapshot and older than the WAL TTL.
    pub fn cleanup(&self, wal: Option<&WriteAheadLog>) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let snapshots = self.list()?;
        let Some(newest) = snapshots.last().cloned() else {
            return Ok(report);
        };

        let now = current_timestamp_ms();
        let ttl_ms = self.snapshot_ttl.as_millis() as u64;
        for info in &snapshots[..snapshots.len() - 1] {
            if now.saturating_sub(info.timestamp_ms) >= ttl_ms {
                fs::remove_file(&info.path).map_err(|e| {
                    CacheError::Snapshot(format!("removing {}: {e}", info.path.display()))
                })?;
                report.snapshots_removed += 1;
            }
        }

        if let Some(wal) = wal {
            report.segments_removed = wal
                .prune(newest.wal_sequence, self.wal_ttl)
                .map_err(|e| CacheError::Snapshot(format!("pruning WAL: {e}")))?;
        }

        if report != CleanupReport::default() {
            info!(
                "Snapshot cleanup removed {} snapshots and {} WAL segments",
                report.snapshots_removed, report.segments_removed
            );
        }
        Ok(report)
    }
}

fn snapshot_file_name(timestamp_ms: u64, wal_sequence: u64) -> String {
    format!("{SNAPSHOT_PREFIX}{timestamp_ms:013}-{wal_sequence:020}{SNAPSHOT_SUFFIX}")
}

fn parse_file_name(path: &Path) -> Option<(u64, u64)> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix(SNAPSHOT_PREFIX)?.strip_suffix(SNAPSHOT_SUFFIX)?;
    let (timestamp, sequence) = stem.split_once('-')?;
    Some((timestamp.parse().ok()?, sequence.parse().ok()?))
}
