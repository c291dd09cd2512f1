//! # treesync - Concurrent, cancellable directory tree synchronization
//!
//! A directory synchronization engine: given a source tree and a destination
//! path it discovers entries, decides what to copy, skip or delete, performs
//! the I/O in parallel on a bounded worker pool, and reports live progress.
//!
//! ## Overview
//!
//! treesync has two modes of operation:
//! - **Mirror/copy** with [`Synchronizer`]: fans out over many directories at
//!   once on a continuation-based task scheduler, records per-entry errors and
//!   keeps going
//! - **Move** with [`MoveOperation`]: relocates one directory tree plus its
//!   side files through a sequential discover, copy, delete-source pipeline
//!   that rolls the destination back when cancelled
//!
//! ## Architecture
//!
//! - **Entries**: [`Entry`] is an immutable snapshot of one filesystem object
//!   (kind, reparse-ness, size, last write time)
//! - **Filesystem capability**: every disk access goes through the
//!   [`FileSystem`] trait; [`LocalFileSystem`] is the real implementation
//! - **Scheduler**: [`scheduler::Scheduler`] runs [`scheduler::Task`]s on a
//!   fixed worker pool, with `then` chaining, flattening and fan-in barriers
//! - **Statistics**: lock-free counters with serializable snapshots
//! - **Progress**: throttled pulse waiting and an observer hub
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use treesync::{CopyOptions, Synchronizer, Throttle};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let synchronizer = Synchronizer::new(CopyOptions::mirror())?;
//! let handle = synchronizer.synchronize_paths(Path::new("./photos"), Path::new("/backup/photos"))?;
//!
//! let mut throttle = Throttle::new(Duration::from_millis(500));
//! handle.wait_with_pulse(Duration::from_millis(50), &mut throttle, |stats| {
//!     println!("{} files copied so far", stats.files_copied);
//! });
//!
//! let stats = handle.join()?;
//! for error in &stats.errors {
//!     eprintln!("{}: {}", error.path.display(), error.message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Moving a directory with its side files
//!
//! ```rust,no_run
//! use treesync::{CancellationToken, MoveGroup, MoveOperation};
//! use std::path::Path;
//!
//! let group = MoveGroup::new("/games", "common/Game").with_side_file("appmanifest_1.acf");
//! let result = MoveOperation::new().run(&group, Path::new("/fast/games"), |_| {}, &CancellationToken::new());
//! println!("{:?}", result.is_completed());
//! ```
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result<T>`] with [`SyncError`]. Mirror runs
//! do not fail for a single entry: such errors are collected in the final
//! [`StatisticsSnapshot`]. Moves return the tri-state [`MoveResult`].
//!
//! ## Module Organization
//!
//! - [`entry`]: filesystem entry snapshots
//! - [`fs`]: the filesystem capability and its local implementation
//! - [`scheduler`]: tasks, continuations and the worker pool
//! - [`sync`]: the parallel synchronizer
//! - [`mover`]: the sequential move pipeline
//! - [`stats`]: statistics counters and snapshots
//! - [`progress`]: throttling, pulse waiting and observers
//! - [`config`]: JSON configuration
//! - [`types`]: options and cancellation
//! - [`error`]: error types

// Public API modules
pub mod config;
pub mod entry;
pub mod error;
pub mod fs;
pub mod mover;
pub mod pool;
pub mod progress;
pub mod scheduler;
pub mod stats;
pub mod sync;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use config::SyncConfig;
pub use entry::{Entry, EntryKind, ReparseKind};
pub use error::{Result, SyncError};
pub use fs::{FileSystem, LocalFileSystem};
pub use mover::{MoveGroup, MoveOperation, MovePhase, MoveProgressInfo, MoveResult};
pub use progress::{EventHub, SubscriptionId, SyncEvent, Throttle};
pub use stats::{ErrorRecord, Statistics, StatisticsSnapshot};
pub use sync::{DefaultComparer, EntryComparer, SyncHandle, Synchronizer, SynchronizerBuilder};
pub use types::*;
