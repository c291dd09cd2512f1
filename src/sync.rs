//! Parallel directory tree synchronizer
//!
//! The [`Synchronizer`] makes a destination directory match a source tree. It
//! runs on a [`Scheduler`] and treats every directory as one unit of work:
//!
//! 1. Ensure the destination directory exists. A directory created here is
//!    known to be empty, so it is neither enumerated nor cleaned.
//! 2. List the source children (failure aborts this subtree only) and the
//!    destination children (failure is recorded and the listing treated as
//!    empty).
//! 3. Delete destination entries according to the [`DeletePolicy`]. Each
//!    deletion is its own task; directories are removed bottom-up.
//! 4. Once every deletion has finished, recurse into each source
//!    subdirectory as a new task. Reparse points are never traversed.
//! 5. Once every subdirectory has finished, copy the directory's own files
//!    and links, skipping those the [`EntryComparer`] reports as identical.
//!
//! Fan-in between the stages uses [`TaskCollection::then_all`], so no worker
//! ever blocks waiting on another. Sibling directories run concurrently.
//!
//! ## Errors
//!
//! Per-entry failures are recorded in [`Statistics`] and processing continues
//! with the siblings. The run as a whole only reports them; it never fails
//! because of a single entry.
//!
//! ## Cancellation
//!
//! Cancellation is cooperative. The token is checked before each entry and
//! before each subdirectory is spawned; work already in flight completes, and
//! the final snapshot reports `cancelled`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use treesync::{CopyOptions, Synchronizer};
//! use std::path::Path;
//!
//! # fn main() -> treesync::Result<()> {
//! let synchronizer = Synchronizer::builder()
//!     .options(CopyOptions::mirror())
//!     .exclude(["*.tmp"])
//!     .workers(4)
//!     .build()?;
//!
//! let handle = synchronizer.synchronize_paths(Path::new("./library"), Path::new("/mnt/backup/library"))?;
//! let stats = handle.join()?;
//! println!("{} files copied, {} skipped", stats.files_copied, stats.files_skipped);
//! # Ok(())
//! # }
//! ```

use crate::entry::{self, Entry, ReparseKind};
use crate::error::{Result, SyncError};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::pool::{EntryListPool, PooledEntries};
use crate::progress::{self, EventHub, SyncEvent, Throttle};
use crate::scheduler::{Scheduler, Spawner, Task, TaskCollection};
use crate::stats::{Counter, Statistics, StatisticsSnapshot};
use crate::types::{CancellationToken, CopyOptions, DeletePolicy};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Decides whether a destination entry already holds the source entry
pub trait EntryComparer: Send + Sync {
    /// Whether `destination` is identical to `source` and can be skipped
    fn is_identical(&self, source: &Entry, destination: &Entry, fs: &dyn FileSystem) -> Result<bool>;
}

/// Metadata comparison: kind, reparse-ness, size, name and write time
///
/// For reparse points the link targets must match as well. File contents are
/// never read.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultComparer;

impl EntryComparer for DefaultComparer {
    fn is_identical(&self, source: &Entry, destination: &Entry, fs: &dyn FileSystem) -> Result<bool> {
        if !source.matches(destination) {
            return Ok(false);
        }
        if source.is_reparse_point() {
            let source_target = fs.get_reparse_target(source.path())?;
            let destination_target = fs.get_reparse_target(destination.path())?;
            return Ok(source_target == destination_target);
        }
        Ok(true)
    }
}

/// Compiled exclude patterns, matched case-insensitively against entry names
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    set: GlobSet,
    patterns: Vec<String>,
}

impl ExcludeSet {
    /// Compile `patterns`
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
            kept.push(pattern.to_string());
        }
        Ok(Self {
            set: builder.build()?,
            patterns: kept,
        })
    }

    /// A set that excludes nothing
    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// Whether an entry with this name is excluded
    pub fn is_excluded(&self, name: &OsStr) -> bool {
        !self.patterns.is_empty() && self.set.is_match(Path::new(name))
    }

    /// Source patterns
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Parallel tree synchronizer bound to a worker pool
///
/// One synchronizer may run any number of synchronizations, one after the
/// other or at the same time; they share its pool and its cancellation token.
pub struct Synchronizer {
    scheduler: Arc<Scheduler>,
    fs: Arc<dyn FileSystem>,
    comparer: Arc<dyn EntryComparer>,
    options: CopyOptions,
    excludes: Arc<ExcludeSet>,
    cancellation: CancellationToken,
    events: Arc<EventHub>,
    pool: Arc<EntryListPool>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("scheduler", &self.scheduler)
            .field("options", &self.options)
            .field("excludes", &self.excludes.patterns())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl Synchronizer {
    /// Synchronizer with `options` and every other setting at its default
    pub fn new(options: CopyOptions) -> Result<Self> {
        Self::builder().options(options).build()
    }

    /// Start configuring a synchronizer
    pub fn builder() -> SynchronizerBuilder {
        SynchronizerBuilder::new()
    }

    /// Effective copy options
    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// Observer hub receiving [`SyncEvent`]s from every run
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Token that cancels every run of this synchronizer
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Worker pool used by this synchronizer
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Start synchronizing `source_root` into `destination`
    ///
    /// Returns immediately; the work runs on the pool. `source_root` must be a
    /// directory entry. `destination` is created if it does not exist.
    pub fn synchronize(&self, source_root: Entry, destination: impl Into<PathBuf>) -> SyncHandle {
        let destination = destination.into();
        let statistics = Arc::new(Statistics::new());
        info!(
            "Synchronizing {:?} -> {:?} (policy: {:?}, skip identical: {})",
            source_root.path(),
            destination,
            self.options.delete_policy(),
            self.options.skip_identical_files
        );

        let run = Arc::new(Run {
            spawner: self.scheduler.spawner().clone(),
            fs: Arc::clone(&self.fs),
            comparer: Arc::clone(&self.comparer),
            policy: self.options.delete_policy(),
            skip_identical: self.options.skip_identical_files,
            excludes: Arc::clone(&self.excludes),
            cancellation: self.cancellation.clone(),
            events: Arc::clone(&self.events),
            pool: Arc::clone(&self.pool),
            stats: Arc::clone(&statistics),
        });

        let baseline = self.scheduler.busy_time();
        let scheduler = Arc::clone(&self.scheduler);
        let finisher = Arc::clone(&run);
        let root = destination.clone();
        let task = run
            .sync_directory(source_root.path().to_path_buf(), destination, true)
            .then(move |result| {
                if let Err(e) = result {
                    finisher.fail(&root, &e);
                }
                let stats = &finisher.stats;
                stats.set_worker_time(scheduler.busy_time().saturating_sub(baseline));
                stats.finish();
                let snapshot = stats.snapshot();
                info!(
                    "Synchronization of {:?} finished in {:?}: {} copied, {} skipped, {} deleted, {} errors{}",
                    root,
                    snapshot.elapsed,
                    snapshot.files_copied + snapshot.links_copied,
                    snapshot.files_skipped + snapshot.links_skipped,
                    snapshot.entries_deleted(),
                    snapshot.errors.len(),
                    if snapshot.cancelled { " (cancelled)" } else { "" }
                );
                Ok(snapshot)
            });

        SyncHandle {
            task,
            statistics,
            cancellation: self.cancellation.clone(),
        }
    }

    /// Look up `source` and synchronize it into `destination`
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFound`] if `source` does not exist
    /// - [`SyncError::Validation`] if `source` is not a directory
    pub fn synchronize_paths(&self, source: &Path, destination: &Path) -> Result<SyncHandle> {
        let root = self
            .fs
            .get_entry(source)?
            .ok_or_else(|| SyncError::NotFound(source.to_path_buf()))?;
        if !root.is_directory() {
            return Err(SyncError::validation(format!("{:?} is not a directory", source)));
        }
        Ok(self.synchronize(root, destination))
    }
}

/// Handle to one running synchronization
#[derive(Debug)]
pub struct SyncHandle {
    task: Task<StatisticsSnapshot>,
    statistics: Arc<Statistics>,
    cancellation: CancellationToken,
}

impl SyncHandle {
    /// Live statistics at this instant
    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    /// Request cancellation of the run
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether the run has finished
    pub fn is_completed(&self) -> bool {
        self.task.is_completed()
    }

    /// Block up to `timeout`; returns whether the run finished
    pub fn wait(&self, timeout: Duration) -> bool {
        self.task.wait(timeout)
    }

    /// Block until the run finishes, calling `pulse` with live snapshots
    ///
    /// See [`progress::wait_with_pulse`] for the pulse timing.
    pub fn wait_with_pulse<F>(&self, poll_interval: Duration, throttle: &mut Throttle, mut pulse: F)
    where
        F: FnMut(&StatisticsSnapshot),
    {
        progress::wait_with_pulse(&self.task, poll_interval, throttle, || {
            pulse(&self.statistics.snapshot())
        });
    }

    /// Block until the run finishes and return the final statistics
    pub fn join(self) -> Result<StatisticsSnapshot> {
        self.task.join()
    }

    /// The root task, for chaining further work
    pub fn into_task(self) -> Task<StatisticsSnapshot> {
        self.task
    }
}

/// Fluent configuration for [`Synchronizer`]
///
/// # Default Values
///
/// - `workers`: number of CPU cores
/// - `options`: [`CopyOptions::default`] (copy everything, delete nothing)
/// - `comparer`: [`DefaultComparer`]
/// - `file_system`: [`LocalFileSystem`] with the default chunk size
pub struct SynchronizerBuilder {
    workers: usize,
    options: CopyOptions,
    comparer: Option<Arc<dyn EntryComparer>>,
    file_system: Option<Arc<dyn FileSystem>>,
    chunk_size: Option<usize>,
    cancellation: Option<CancellationToken>,
    scheduler: Option<Arc<Scheduler>>,
}

impl SynchronizerBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self {
            workers: num_cpus::get(),
            options: CopyOptions::default(),
            comparer: None,
            file_system: None,
            chunk_size: None,
            cancellation: None,
            scheduler: None,
        }
    }

    /// Number of worker threads (minimum 1)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Copy and delete options
    pub fn options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    /// Add exclude patterns on top of those in the options
    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = self.options.exclude(patterns);
        self
    }

    /// Custom identity check for `skip_identical_files`
    pub fn comparer(mut self, comparer: impl EntryComparer + 'static) -> Self {
        self.comparer = Some(Arc::new(comparer));
        self
    }

    /// Custom filesystem implementation
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Copy chunk size for the default [`LocalFileSystem`]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Share an existing cancellation token
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Run on an existing pool instead of starting a new one
    pub fn scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Build the synchronizer
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidPattern`] if an exclude pattern does not compile
    /// - [`SyncError::ThreadPool`] if the worker threads cannot be started
    pub fn build(self) -> Result<Synchronizer> {
        let excludes = if self.options.exclude.is_empty() {
            ExcludeSet::empty()
        } else {
            ExcludeSet::new(&self.options.exclude)?
        };
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(Scheduler::new(self.workers)?),
        };
        let fs = self.file_system.unwrap_or_else(|| {
            let local = match self.chunk_size {
                Some(size) => LocalFileSystem::new().with_chunk_size(size),
                None => LocalFileSystem::new(),
            };
            Arc::new(local)
        });
        debug!("Built synchronizer with {} workers", scheduler.worker_count());

        Ok(Synchronizer {
            pool: Arc::new(EntryListPool::new(scheduler.worker_count() * 2)),
            scheduler,
            fs,
            comparer: self.comparer.unwrap_or_else(|| Arc::new(DefaultComparer)),
            options: self.options,
            excludes: Arc::new(excludes),
            cancellation: self.cancellation.unwrap_or_default(),
            events: Arc::new(EventHub::new()),
        })
    }
}

impl Default for SynchronizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SynchronizerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizerBuilder")
            .field("workers", &self.workers)
            .field("options", &self.options)
            .field("custom_comparer", &self.comparer.is_some())
            .field("custom_file_system", &self.file_system.is_some())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// State shared by every task of one run
struct Run {
    spawner: Spawner,
    fs: Arc<dyn FileSystem>,
    comparer: Arc<dyn EntryComparer>,
    policy: DeletePolicy,
    skip_identical: bool,
    excludes: Arc<ExcludeSet>,
    cancellation: CancellationToken,
    events: Arc<EventHub>,
    pool: Arc<EntryListPool>,
    stats: Arc<Statistics>,
}

/// One directory's listings, carried from stage to stage
struct DirectoryPlan {
    destination: PathBuf,
    sources: PooledEntries,
    /// Destination children that survived deletion
    destinations: PooledEntries,
    source_index: NameIndex,
    destination_index: NameIndex,
}

impl DirectoryPlan {
    fn existing(&self, source: &Entry) -> Option<&Entry> {
        self.destination_index
            .find(source.name(), &self.source_index)
            .map(|index| &self.destinations[index])
    }
}

impl Run {
    fn sync_directory(self: &Arc<Self>, source: PathBuf, destination: PathBuf, is_root: bool) -> Task<()> {
        let run = Arc::clone(self);
        self.spawner
            .submit(move || run.visit(source, destination, is_root))
            .flatten()
    }

    /// Stages 1 to 3; returns the task that completes when the subtree is done
    fn visit(self: &Arc<Self>, source: PathBuf, destination: PathBuf, is_root: bool) -> Result<Task<()>> {
        self.check_cancelled()?;
        debug!("Visiting {:?} -> {:?}", source, destination);

        let created = self.ensure_directory(&destination, is_root)?;

        let mut sources = EntryListPool::acquire(&self.pool);
        self.list_into(&source, &mut sources)?;
        self.stats.increment(Counter::DirectoriesEnumerated);
        for entry in sources.iter() {
            if entry.is_reparse_point() {
                self.stats.increment(Counter::LinksEnumerated);
            } else if entry.is_regular_file() {
                self.stats.increment(Counter::FilesEnumerated);
            }
        }

        let mut destinations = EntryListPool::acquire(&self.pool);
        if !created {
            if let Err(e) = self.list_into(&destination, &mut destinations) {
                self.fail(&destination, &e);
                destinations.clear();
            }
        }

        let source_index = NameIndex::new(&sources);
        let listed_index = NameIndex::new(&destinations);
        let mut deletes = TaskCollection::with_spawner(self.spawner.clone());
        destinations.retain(|existing| {
            let counterpart = source_index
                .find(existing.name(), &listed_index)
                .map(|index| &sources[index]);
            let delete = match self.policy {
                DeletePolicy::None => false,
                DeletePolicy::Mismatched => counterpart.is_some_and(|source| !source.same_kind(existing)),
                DeletePolicy::Extra => counterpart.map_or(true, |source| !source.same_kind(existing)),
            };
            if delete {
                deletes.push(self.delete_subtree(existing.clone()));
            }
            !delete
        });
        if !deletes.is_empty() {
            debug!("Deleting {} entries under {:?}", deletes.len(), destination);
        }

        let destination_index = NameIndex::new(&destinations);
        let plan = DirectoryPlan {
            destination,
            sources,
            destinations,
            source_index,
            destination_index,
        };
        let run = Arc::clone(self);
        Ok(deletes.then_all(move |_| Ok(run.descend(plan))).flatten())
    }

    /// Stage 4: recurse into subdirectories, then copy this directory's files
    fn descend(self: &Arc<Self>, plan: DirectoryPlan) -> Task<()> {
        let mut children = TaskCollection::with_spawner(self.spawner.clone());
        let mut child_paths = Vec::new();

        for entry in plan.sources.iter().filter(|e| e.is_traversable_directory()) {
            if self.check_cancelled().is_err() {
                break;
            }
            let target = match plan.existing(entry) {
                Some(existing) if !existing.same_kind(entry) => {
                    self.fail(existing.path(), &kind_mismatch(entry, existing));
                    continue;
                }
                Some(existing) => existing.path().to_path_buf(),
                None => plan.destination.join(entry.name()),
            };
            child_paths.push(target.clone());
            children.push(self.sync_directory(entry.path().to_path_buf(), target, false));
        }

        let run = Arc::clone(self);
        children.then_all(move |results| {
            for (path, result) in child_paths.iter().zip(results) {
                if let Err(e) = result {
                    run.fail(path, &e);
                }
            }
            run.copy_entries(plan);
            Ok(())
        })
    }

    /// Stage 5: copy files and links
    fn copy_entries(&self, plan: DirectoryPlan) {
        for source in plan.sources.iter().filter(|e| !e.is_traversable_directory()) {
            if self.check_cancelled().is_err() {
                break;
            }
            let existing = plan.existing(source);
            let target = match existing {
                Some(existing) => existing.path().to_path_buf(),
                None => plan.destination.join(source.name()),
            };
            if let Err(e) = self.copy_entry(source, &target, existing) {
                self.fail(&target, &e);
            }
        }
        self.stats.increment(Counter::DirectoriesTraversed);
        trace!("Finished directory {:?}", plan.destination);
    }

    fn copy_entry(&self, source: &Entry, target: &Path, existing: Option<&Entry>) -> Result<()> {
        if let Some(existing) = existing {
            if !existing.same_kind(source) {
                return Err(kind_mismatch(source, existing));
            }
            if self.skip_identical && self.comparer.is_identical(source, existing, self.fs.as_ref())? {
                trace!("Skipping identical {:?}", target);
                if source.is_reparse_point() {
                    self.stats.increment(Counter::LinksSkipped);
                } else {
                    self.stats.increment(Counter::FilesSkipped);
                    self.stats.add(Counter::BytesSkipped, source.size());
                }
                self.emit(SyncEvent::FileSkipped {
                    path: target.to_path_buf(),
                    bytes: source.size(),
                });
                return Ok(());
            }
        }

        if source.is_reparse_point() {
            self.copy_link(source, target, existing)
        } else {
            self.copy_file(source, target)
        }
    }

    fn copy_file(&self, source: &Entry, target: &Path) -> Result<()> {
        trace!("Copying {:?} -> {:?}", source.path(), target);
        let announce = self.events.has_subscribers();
        let mut copied = 0u64;
        self.fs.copy_file(source.path(), target, &mut |transferred, total| {
            copied = transferred;
            if announce {
                self.events.emit(&SyncEvent::CopyProgress {
                    path: target.to_path_buf(),
                    transferred,
                    total,
                });
            }
            ControlFlow::Continue(())
        })?;

        self.stats.increment(Counter::FilesCopied);
        self.stats.add(Counter::BytesCopied, copied);
        self.emit(SyncEvent::FileCopied {
            path: target.to_path_buf(),
            bytes: copied,
        });
        Ok(())
    }

    /// Reproduce a reparse point from its target string
    fn copy_link(&self, source: &Entry, target: &Path, existing: Option<&Entry>) -> Result<()> {
        if source.reparse() == Some(ReparseKind::Unsupported) {
            return Err(SyncError::UnsupportedReparsePoint(source.path().to_path_buf()));
        }
        let link_target = self.fs.get_reparse_target(source.path())?;
        if let Some(existing) = existing {
            self.fs.delete_entry(existing)?;
        }
        trace!("Linking {:?} -> {:?}", target, link_target);
        match source.reparse() {
            Some(ReparseKind::Junction) => self.fs.create_junction_point(target, &link_target)?,
            _ => self
                .fs
                .create_symbolic_link(target, &link_target, source.is_directory())?,
        }
        self.fs.set_last_write_time(target, source.last_write_time())?;

        self.stats.increment(Counter::LinksCopied);
        self.emit(SyncEvent::FileCopied {
            path: target.to_path_buf(),
            bytes: 0,
        });
        Ok(())
    }

    fn delete_subtree(self: &Arc<Self>, entry: Entry) -> Task<()> {
        let run = Arc::clone(self);
        self.spawner.submit(move || {
            run.delete_recursive(&entry);
            Ok(())
        })
    }

    /// Delete `entry`, children first; failures are recorded, not returned
    fn delete_recursive(&self, entry: &Entry) {
        if self.check_cancelled().is_err() {
            return;
        }
        if entry.is_traversable_directory() {
            match self.fs.enumerate_entries(entry.path()) {
                Ok(children) => {
                    for child in children {
                        match child {
                            Ok(child) => self.delete_recursive(&child),
                            Err(e) => self.fail(entry.path(), &e),
                        }
                    }
                }
                Err(e) => {
                    self.fail(entry.path(), &e);
                    return;
                }
            }
            if self.cancellation.is_cancelled() {
                return;
            }
        }

        match self.fs.delete_entry(entry) {
            Ok(()) => {
                let counter = if entry.is_reparse_point() {
                    Counter::LinksDeleted
                } else if entry.is_directory() {
                    Counter::DirectoriesDeleted
                } else {
                    Counter::FilesDeleted
                };
                self.stats.increment(counter);
                self.emit(SyncEvent::EntryDeleted {
                    path: entry.path().to_path_buf(),
                    directory: entry.is_directory(),
                });
            }
            Err(e) => self.fail(entry.path(), &e),
        }
    }

    /// Make sure `path` is a directory; returns whether it was created
    fn ensure_directory(&self, path: &Path, is_root: bool) -> Result<bool> {
        match self.fs.get_entry(path)? {
            Some(existing) if existing.is_traversable_directory() => Ok(false),
            // A linked destination root is used as is
            Some(existing) if is_root && existing.is_directory() => Ok(false),
            Some(existing) => Err(SyncError::KindMismatch {
                path: path.to_path_buf(),
                source_kind: "directory".to_string(),
                destination_kind: existing.describe_kind().to_string(),
            }),
            None => {
                self.fs.create_directory(path)?;
                self.stats.increment(Counter::DirectoriesCreated);
                self.emit(SyncEvent::DirectoryCreated {
                    path: path.to_path_buf(),
                });
                trace!("Created directory {:?}", path);
                Ok(true)
            }
        }
    }

    /// List `directory` into `list`, leaving out excluded names
    ///
    /// Failing to open the directory is returned; a failure on one child is
    /// recorded and the child skipped.
    fn list_into(&self, directory: &Path, list: &mut PooledEntries) -> Result<()> {
        for item in self.fs.enumerate_entries(directory)? {
            match item {
                Ok(entry) if self.excludes.is_excluded(entry.name()) => {
                    trace!("Excluded {:?}", entry.path());
                }
                Ok(entry) => list.push(entry),
                Err(e) => self.fail(directory, &e),
            }
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            self.stats.mark_cancelled();
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Record a failure; cancellation only sets the flag
    fn fail(&self, fallback: &Path, error: &SyncError) {
        if error.is_cancellation() {
            self.stats.mark_cancelled();
            return;
        }
        let path = error.path().unwrap_or(fallback);
        self.stats.record_error(path, error);
        self.emit(SyncEvent::Error {
            path: path.to_path_buf(),
            message: error.to_string(),
        });
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.has_subscribers() {
            self.events.emit(&event);
        }
    }
}

/// Name lookup over one side of a directory
///
/// An exact name always wins. The case-folded key is used only when it is
/// unique on both sides, so siblings that differ only by case each keep
/// their own counterpart.
struct NameIndex {
    exact: HashMap<OsString, usize>,
    /// `None` once two names fold to the same key
    folded: HashMap<String, Option<usize>>,
}

impl NameIndex {
    fn new(entries: &[Entry]) -> Self {
        let mut exact = HashMap::with_capacity(entries.len());
        let mut folded = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            exact.insert(entry.name().to_os_string(), index);
            folded
                .entry(entry.name_key())
                .and_modify(|slot: &mut Option<usize>| *slot = None)
                .or_insert(Some(index));
        }
        Self { exact, folded }
    }

    /// Index of the counterpart of `name`, an entry listed in `other`
    fn find(&self, name: &OsStr, other: &NameIndex) -> Option<usize> {
        if let Some(&index) = self.exact.get(name) {
            return Some(index);
        }
        let key = entry::name_key(name);
        match (self.folded.get(&key), other.folded.get(&key)) {
            (Some(&Some(index)), Some(Some(_))) => Some(index),
            _ => None,
        }
    }
}

fn kind_mismatch(source: &Entry, destination: &Entry) -> SyncError {
    SyncError::KindMismatch {
        path: destination.path().to_path_buf(),
        source_kind: source.describe_kind().to_string(),
        destination_kind: destination.describe_kind().to_string(),
    }
}
