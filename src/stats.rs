//! Live synchronization statistics
//!
//! [`Statistics`] is shared by every worker of one synchronization run. All
//! counters are lock-free atomics; only the error list sits behind a mutex, and
//! that lock is never held across I/O. Callers read a consistent-enough view at
//! any time through [`Statistics::snapshot`], which returns an immutable,
//! serializable [`StatisticsSnapshot`].
//!
//! ## Counting rules
//!
//! - Regular files and reparse points are counted separately: `files_*`
//!   counters only ever see regular files, `links_*` counters only links.
//! - A file is either copied or skipped, so for a run without errors
//!   `files_copied + files_skipped == files_enumerated`.
//! - Entries matched by an exclude pattern are not counted at all.
//! - A destination root that did not exist counts as one created directory.

use crate::error::SyncError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Individual counters tracked during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Source directories whose children were listed
    DirectoriesEnumerated,
    /// Directories fully processed (children deleted, recursed, copied)
    DirectoriesTraversed,
    /// Destination directories created
    DirectoriesCreated,
    /// Destination directories deleted
    DirectoriesDeleted,
    /// Regular source files seen
    FilesEnumerated,
    /// Files copied to the destination
    FilesCopied,
    /// Destination files deleted
    FilesDeleted,
    /// Files skipped because the destination was identical
    FilesSkipped,
    /// Bytes written by file copies
    BytesCopied,
    /// Bytes not written because the file was skipped
    BytesSkipped,
    /// Source reparse points seen
    LinksEnumerated,
    /// Reparse points reproduced at the destination
    LinksCopied,
    /// Destination reparse points deleted
    LinksDeleted,
    /// Reparse points skipped because the destination was identical
    LinksSkipped,
}

const COUNTERS: usize = 14;

impl Counter {
    fn index(self) -> usize {
        self as usize
    }
}

/// One recorded per-entry failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Path the failure relates to
    pub path: PathBuf,
    /// Human readable description
    pub message: String,
}

/// Atomic counters and error list for one synchronization run
#[derive(Debug)]
pub struct Statistics {
    counters: [AtomicU64; COUNTERS],
    errors: Mutex<Vec<ErrorRecord>>,
    cancelled: AtomicBool,
    worker_time_nanos: AtomicU64,
    started: Instant,
    finished: Mutex<Option<Duration>>,
}

impl Statistics {
    /// Fresh statistics; the elapsed clock starts now
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            errors: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
            worker_time_nanos: AtomicU64::new(0),
            started: Instant::now(),
            finished: Mutex::new(None),
        }
    }

    /// Add `amount` to a counter
    pub fn add(&self, counter: Counter, amount: u64) {
        self.counters[counter.index()].fetch_add(amount, Ordering::Relaxed);
    }

    /// Add one to a counter
    pub fn increment(&self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Current value of a counter
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Record a per-entry failure and keep going
    pub fn record_error(&self, path: &Path, error: &SyncError) {
        warn!("Error at {:?}: {}", path, error);
        self.errors.lock().push(ErrorRecord {
            path: path.to_path_buf(),
            message: error.to_string(),
        });
    }

    /// Number of errors recorded so far
    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    /// Flag the run as cancelled
    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the run observed a cancellation
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Set cumulative worker busy time
    pub fn set_worker_time(&self, busy: Duration) {
        self.worker_time_nanos.store(busy.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Stop the elapsed clock; later calls keep the first value
    pub fn finish(&self) {
        let mut finished = self.finished.lock();
        if finished.is_none() {
            *finished = Some(self.started.elapsed());
        }
    }

    /// Time since the run started, or its total duration once finished
    pub fn elapsed(&self) -> Duration {
        self.finished.lock().unwrap_or_else(|| self.started.elapsed())
    }

    /// Immutable copy of the current state
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            directories_enumerated: self.get(Counter::DirectoriesEnumerated),
            directories_traversed: self.get(Counter::DirectoriesTraversed),
            directories_created: self.get(Counter::DirectoriesCreated),
            directories_deleted: self.get(Counter::DirectoriesDeleted),
            files_enumerated: self.get(Counter::FilesEnumerated),
            files_copied: self.get(Counter::FilesCopied),
            files_deleted: self.get(Counter::FilesDeleted),
            files_skipped: self.get(Counter::FilesSkipped),
            bytes_copied: self.get(Counter::BytesCopied),
            bytes_skipped: self.get(Counter::BytesSkipped),
            links_enumerated: self.get(Counter::LinksEnumerated),
            links_copied: self.get(Counter::LinksCopied),
            links_deleted: self.get(Counter::LinksDeleted),
            links_skipped: self.get(Counter::LinksSkipped),
            elapsed: self.elapsed(),
            worker_time: Duration::from_nanos(self.worker_time_nanos.load(Ordering::Relaxed)),
            errors: self.errors.lock().clone(),
            cancelled: self.is_cancelled(),
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`Statistics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Source directories whose children were listed
    pub directories_enumerated: u64,
    /// Directories fully processed
    pub directories_traversed: u64,
    /// Destination directories created
    pub directories_created: u64,
    /// Destination directories deleted
    pub directories_deleted: u64,
    /// Regular source files seen
    pub files_enumerated: u64,
    /// Files copied
    pub files_copied: u64,
    /// Destination files deleted
    pub files_deleted: u64,
    /// Files skipped as identical
    pub files_skipped: u64,
    /// Bytes copied
    pub bytes_copied: u64,
    /// Bytes skipped
    pub bytes_skipped: u64,
    /// Source reparse points seen
    pub links_enumerated: u64,
    /// Reparse points reproduced
    pub links_copied: u64,
    /// Destination reparse points deleted
    pub links_deleted: u64,
    /// Reparse points skipped as identical
    pub links_skipped: u64,
    /// Wall time of the run
    pub elapsed: Duration,
    /// Cumulative time worker threads spent on jobs
    pub worker_time: Duration,
    /// Per-entry failures
    pub errors: Vec<ErrorRecord>,
    /// Whether the run stopped early because of cancellation
    pub cancelled: bool,
}

impl StatisticsSnapshot {
    /// Every enumerated file was either copied or skipped
    pub fn is_complete(&self) -> bool {
        self.files_copied + self.files_skipped == self.files_enumerated
    }

    /// Whether any per-entry failure was recorded
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of destination entries deleted, of any kind
    pub fn entries_deleted(&self) -> u64 {
        self.files_deleted + self.directories_deleted + self.links_deleted
    }

    /// Bytes that were copied or skipped
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_copied + self.bytes_skipped
    }
}
