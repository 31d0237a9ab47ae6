//! Write-Ahead Log Module
//!
//! Append-only durability log for cache mutations, replayed on startup.
//!
//! ## Layout
//! ```text
//! wal/
//! ├── wal-00000000000000000001.log   (closed)
//! ├── wal-00000000000000000815.log   (closed)
//! └── wal-00000000000000001204.log   (active)
//! ```
//! Segment names carry the sequence number of their first record. Each
//! segment is a series of newline-terminated JSON frames. A frame without
//! its trailing newline is a torn write and is dropped on replay.

mod record;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};

pub use record::{base64_bytes, WalOp, WalRecord};

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";

// == Flush Policy ==
/// When buffered frames reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Flush and fsync on every commit
    Always,
    /// Flush at most once per interval; the flush task covers idle periods
    Periodic(Duration),
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::Periodic(Duration::from_secs(1))
    }
}

// == Replay Stats ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    /// Records newer than the starting sequence handed to the applier
    pub replayed: u64,
    /// Records the applier actually changed state for
    pub applied: u64,
    /// Duplicate or out-of-order records ignored
    pub skipped: u64,
    /// Unreadable frames in the middle of a segment
    pub corrupted: u64,
    /// Incomplete trailing frames dropped
    pub torn: u64,
}

/// A segment file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub path: PathBuf,
    pub first_sequence: u64,
}

struct SegmentScan {
    records: Vec<WalRecord>,
    corrupted: u64,
    torn: bool,
}

// == Segment Writer ==
struct SegmentWriter {
    path: PathBuf,
    file: BufWriter<File>,
    first_sequence: u64,
    next_sequence: u64,
    records: u64,
    dirty: bool,
    last_flush: Instant,
}

impl SegmentWriter {
    /// Creates (or truncates) the segment starting at `first_sequence`.
    ///
    /// A pre-existing file with that name cannot hold valid records newer
    /// than what the caller already knows about, so truncating it is safe.
    fn create(dir: &Path, first_sequence: u64) -> Result<Self> {
        let path = segment_path(dir, first_sequence);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| CacheError::WalWrite(format!("{}: {e}", path.display())))?;

        debug!(segment = %path.display(), "Opened WAL segment");
        Ok(Self {
            path,
            file: BufWriter::new(file),
            first_sequence,
            next_sequence: first_sequence,
            records: 0,
            dirty: false,
            last_flush: Instant::now(),
        })
    }

    fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.file
                .flush()
                .map_err(|e| CacheError::WalWrite(e.to_string()))?;
            self.dirty = false;
        }
        self.last_flush = Instant::now();
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.file
            .get_ref()
            .sync_data()
            .map_err(|e| CacheError::WalWrite(e.to_string()))
    }
}

// == Write-Ahead Log ==
pub struct WriteAheadLog {
    dir: PathBuf,
    policy: FlushPolicy,
    writer: Mutex<SegmentWriter>,
    injected_failures: AtomicUsize,
}

impl WriteAheadLog {
    /// Opens the log directory, resuming numbering after the newest record on disk.
    ///
    /// Always starts a fresh active segment so a torn tail is never appended to.
    pub fn open(dir: impl AsRef<Path>, policy: FlushPolicy) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let segments = list_segments(&dir)?;
        let last_sequence = last_sequence_on_disk(&segments)?;
        let writer = SegmentWriter::create(&dir, last_sequence + 1)?;

        info!(
            "WAL opened at {} ({} segments, last sequence {})",
            dir.display(),
            segments.len(),
            last_sequence
        );
        Ok(Self {
            dir,
            policy,
            writer: Mutex::new(writer),
            injected_failures: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Sequence number of the newest appended record, 0 if none.
    pub fn last_sequence(&self) -> u64 {
        self.writer.lock().next_sequence - 1
    }

    // == Append ==
    /// Enqueues a frame in the active segment and returns its sequence number.
    ///
    /// The frame is buffered; `commit` applies the flush policy.
    pub fn append(&self, op: WalOp, timestamp: u64) -> Result<u64> {
        if self.take_injected_failure() {
            return Err(CacheError::WalWrite("injected write failure".to_string()));
        }

        let mut writer = self.writer.lock();
        let record = WalRecord {
            sequence: writer.next_sequence,
            timestamp,
            op,
        };
        let frame = record.to_frame()?;
        writer
            .file
            .write_all(&frame)
            .map_err(|e| CacheError::WalWrite(e.to_string()))?;

        writer.next_sequence += 1;
        writer.records += 1;
        writer.dirty = true;
        Ok(record.sequence)
    }

    /// Makes appended frames durable according to the flush policy.
    pub fn commit(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        match self.policy {
            FlushPolicy::Always => writer.sync(),
            FlushPolicy::Periodic(interval) => {
                if writer.dirty && writer.last_flush.elapsed() >= interval {
                    writer.flush()
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Flushes buffered frames to the active segment.
    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush()
    }

    /// Flushes and fsyncs the active segment.
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().sync()
    }

    // == Rotate ==
    /// Closes the active segment and starts a new one at the next sequence.
    ///
    /// No-op when the active segment is still empty. Returns the new segment's first sequence.
    pub fn rotate(&self) -> Result<u64> {
        let mut writer = self.writer.lock();
        if writer.records == 0 {
            return Ok(writer.first_sequence);
        }
        writer.sync()?;
        let next = writer.next_sequence;
        *writer = SegmentWriter::create(&self.dir, next)?;
        info!("WAL rotated to segment starting at {}", next);
        Ok(next)
    }

    /// Abandons the active segment after a write failure and opens a fresh one.
    pub fn reopen(&self) -> Result<u64> {
        let mut writer = self.writer.lock();
        if let Err(e) = writer.flush() {
            warn!("Dropping unflushed WAL frames while reopening: {}", e);
        }
        let next = writer.next_sequence;
        *writer = SegmentWriter::create(&self.dir, next)?;
        info!("WAL reopened at sequence {}", next);
        Ok(next)
    }

    // == Replay ==
    /// Feeds every record with `sequence > after_sequence` to `apply`, in order.
    ///
    /// `apply` returns whether the record changed state. Torn tails are dropped
    /// silently; corrupted frames and unreadable segments are skipped with a warning.
    pub fn replay<F>(&self, after_sequence: u64, mut apply: F) -> Result<ReplayStats>
    where
        F: FnMut(&WalRecord) -> bool,
    {
        self.flush()?;
        let segments = self.segments()?;
        let mut stats = ReplayStats::default();
        let mut last_seen = after_sequence;

        for (index, segment) in segments.iter().enumerate() {
            let fully_covered = segments
                .get(index + 1)
                .is_some_and(|next| next.first_sequence.saturating_sub(1) <= after_sequence);
            if fully_covered {
                continue;
            }

            let scan = match read_segment(&segment.path) {
                Ok(scan) => scan,
                Err(e) => {
                    let err = CacheError::WalReplay(format!("{}: {e}", segment.path.display()));
                    warn!("Skipping WAL segment: {}", err);
                    stats.corrupted += 1;
                    continue;
                }
            };
            stats.corrupted += scan.corrupted;
            stats.torn += u64::from(scan.torn);

            for record in scan.records {
                if record.sequence <= after_sequence {
                    continue;
                }
                if record.sequence <= last_seen {
                    stats.skipped += 1;
                    continue;
                }
                if last_seen > after_sequence && record.sequence > last_seen + 1 {
                    debug!(
                        "WAL sequence gap: {} -> {}",
                        last_seen, record.sequence
                    );
                }
                last_seen = record.sequence;
                stats.replayed += 1;
                if apply(&record) {
                    stats.applied += 1;
                }
            }
        }

        info!(
            "WAL replay after sequence {}: {} replayed, {} applied, {} corrupted, {} torn",
            after_sequence, stats.replayed, stats.applied, stats.corrupted, stats.torn
        );
        Ok(stats)
    }

    // == Prune ==
    /// Deletes closed segments whose records are all `<= covered_through` and
    /// whose files are older than `older_than`. Returns the number removed.
    pub fn prune(&self, covered_through: u64, older_than: Duration) -> Result<usize> {
        let active = self.writer.lock().path.clone();
        let segments = self.segments()?;
        let mut removed = 0;

        for pair in segments.windows(2) {
            let (segment, next) = (&pair[0], &pair[1]);
            if segment.path == active {
                continue;
            }
            if next.first_sequence.saturating_sub(1) > covered_through {
                break;
            }
            let age = fs::metadata(&segment.path)?
                .modified()?
                .elapsed()
                .unwrap_or_default();
            if age < older_than {
                continue;
            }
            fs::remove_file(&segment.path)?;
            debug!(segment = %segment.path.display(), "Pruned WAL segment");
            removed += 1;
        }
        Ok(removed)
    }

    /// Segment files in sequence order.
    pub fn segments(&self) -> Result<Vec<SegmentInfo>> {
        list_segments(&self.dir)
    }

    /// Makes the next `count` appends fail, for exercising recovery paths.
    #[doc(hidden)]
    pub fn inject_write_failures(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        if let Err(e) = self.writer.get_mut().sync() {
            warn!("Failed to flush WAL on drop: {}", e);
        }
    }
}

fn segment_path(dir: &Path, first_sequence: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{first_sequence:020}{SEGMENT_SUFFIX}"))
}

fn list_segments(dir: &Path) -> Result<Vec<SegmentInfo>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let first_sequence = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(SEGMENT_PREFIX))
            .and_then(|name| name.strip_suffix(SEGMENT_SUFFIX))
            .and_then(|digits| digits.parse::<u64>().ok());
        if let Some(first_sequence) = first_sequence {
            segments.push(SegmentInfo {
                path,
                first_sequence,
            });
        }
    }
    segments.sort_by_key(|segment| segment.first_sequence);
    Ok(segments)
}

/// Highest sequence already used on disk, including numbers reserved by empty segments.
fn last_sequence_on_disk(segments: &[SegmentInfo]) -> Result<u64> {
    let reserved = segments
        .last()
        .map(|segment| segment.first_sequence.saturating_sub(1))
        .unwrap_or(0);

    for segment in segments.iter().rev() {
        if let Some(record) = read_segment(&segment.path)?.records.last() {
            return Ok(record.sequence.max(reserved));
        }
    }
    Ok(reserved)
}

fn read_segment(path: &Path) -> Result<SegmentScan> {
    let data = fs::read(path)?;
    let pieces: Vec<&[u8]> = data.split(|byte| *byte == b'\n').collect();
    let tail_index = pieces.len().saturating_sub(1);

    let mut scan = SegmentScan {
        records: Vec::new(),
        corrupted: 0,
        torn: false,
    };
    for (index, line) in pieces.iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        match WalRecord::from_frame(line) {
            Ok(record) => scan.records.push(record),
            Err(e) if index == tail_index => {
                debug!(segment = %path.display(), "Dropping torn WAL tail: {}", e);
                scan.torn = true;
            }
            Err(e) => {
                warn!(
                    segment = %path.display(),
                    "Skipping corrupted WAL frame {}: {}",
                    index, e
                );
                scan.corrupted += 1;
            }
        }
    }
    Ok(scan)
}
