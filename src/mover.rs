//! Sequential move with rollback on cancellation
//!
//! A [`MoveOperation`] relocates one [`MoveGroup`] (a primary directory, an
//! optional secondary directory and any number of side files, all relative to
//! one source root) to the same relative locations under a new root. The
//! pipeline runs inline on the calling thread in strict phase order:
//!
//! 1. [`MovePhase::DiscoveringSourceFiles`]: walk every source tree to total
//!    files, directories and bytes.
//! 2. [`MovePhase::CopyingFiles`]: copy the primary tree, the secondary tree,
//!    then the side files, preserving last write times.
//! 3. [`MovePhase::DeletingSourceDirectory`]: delete the sources bottom-up.
//!
//! Everything is validated up front, before any I/O that changes the disk:
//! sources must exist with the right kind, destination directories must be
//! missing or empty, destination side files must be missing.
//!
//! ## Cancellation and failure
//!
//! The cancellation token is checked before every file and directory and on
//! every copy progress chunk, so a cancelled copy overshoots by at most one
//! chunk. A cancellation during discovery or copying rolls back: every
//! destination path this move created is deleted again (a destination
//! directory that already existed empty is kept) in phase
//! [`MovePhase::DeletingDestinationAfterCancellation`], and the result is
//! [`MoveResult::Cancelled`]. Once source deletion has started the move can no
//! longer be cancelled.
//!
//! Any other failure returns [`MoveResult::Failed`] and leaves the partial
//! destination in place for inspection; no rollback is attempted.
//!
//! ## Example
//!
//! ```rust,no_run
//! use treesync::{CancellationToken, MoveGroup, MoveOperation, MoveResult};
//! use std::path::Path;
//!
//! let group = MoveGroup::new("/games/library", "common/MyGame")
//!     .with_secondary("workshop/content/42")
//!     .with_side_file("appmanifest_42.acf");
//!
//! let cancel = CancellationToken::new();
//! let result = MoveOperation::new().run(
//!     &group,
//!     Path::new("/mnt/fast/library"),
//!     |progress| println!("{:?} {:.1}%", progress.phase, progress.percent()),
//!     &cancel,
//! );
//! match result {
//!     MoveResult::Completed(info) => println!("moved {} files", info.moved_files),
//!     MoveResult::Cancelled(_) => println!("cancelled, destination cleaned up"),
//!     MoveResult::Failed(e) => eprintln!("move failed: {}", e.user_message()),
//! }
//! ```

use crate::entry::{Entry, ReparseKind};
use crate::error::{Result, SyncError};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::progress::Throttle;
use crate::stats::ErrorRecord;
use crate::types::CancellationToken;
use crate::utils::estimate_remaining;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Default minimum time between two throttled progress reports
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Paths that move together as one unit
///
/// All paths except `source_root` are relative to it, and each lands at the
/// same relative location under the destination root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveGroup {
    source_root: PathBuf,
    primary: PathBuf,
    secondary: Option<PathBuf>,
    side_files: Vec<PathBuf>,
}

impl MoveGroup {
    /// Group with a primary directory only
    pub fn new(source_root: impl Into<PathBuf>, primary: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            primary: primary.into(),
            secondary: None,
            side_files: Vec::new(),
        }
    }

    /// Add the secondary directory
    pub fn with_secondary(mut self, secondary: impl Into<PathBuf>) -> Self {
        self.secondary = Some(secondary.into());
        self
    }

    /// Add a side file
    pub fn with_side_file(mut self, side_file: impl Into<PathBuf>) -> Self {
        self.side_files.push(side_file.into());
        self
    }

    /// Library root the relative paths start from
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Relative primary directory
    pub fn primary(&self) -> &Path {
        &self.primary
    }

    /// Relative secondary directory
    pub fn secondary(&self) -> Option<&Path> {
        self.secondary.as_deref()
    }

    /// Relative side files
    pub fn side_files(&self) -> &[PathBuf] {
        &self.side_files
    }

    /// Directories in copy order: primary, then secondary
    fn directories(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.primary.as_path()).chain(self.secondary.as_deref())
    }
}

/// Stage of a move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovePhase {
    /// Totalling the source trees
    DiscoveringSourceFiles,
    /// Writing the destination
    CopyingFiles,
    /// Removing the sources after a complete copy
    DeletingSourceDirectory,
    /// Removing partial destination writes after a cancellation
    DeletingDestinationAfterCancellation,
}

/// Immutable snapshot of a move's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveProgressInfo {
    /// Current stage
    pub phase: MovePhase,
    /// Files (and links) to move
    pub total_files: u64,
    /// Files (and links) copied so far
    pub moved_files: u64,
    /// Directories to move
    pub total_directories: u64,
    /// Directories created or reused so far
    pub moved_directories: u64,
    /// Bytes to move
    pub total_bytes: u64,
    /// Bytes copied so far
    pub moved_bytes: u64,
    /// File being copied
    pub current_file: Option<PathBuf>,
    /// Bytes of the current file copied so far
    pub current_file_transferred: u64,
    /// Size of the current file
    pub current_file_total: u64,
    /// Directory being processed
    pub current_directory: Option<PathBuf>,
    /// When the move started
    pub started_at: DateTime<Utc>,
    /// When this snapshot was taken
    pub updated_at: DateTime<Utc>,
    /// Time since the move started
    pub elapsed: Duration,
    /// Estimated time to finish copying, once it can be estimated
    pub eta: Option<Duration>,
    /// Files and links deleted in the current deleting phase
    pub deleted_files: u64,
    /// Directories deleted in the current deleting phase
    pub deleted_directories: u64,
    /// Failures while rolling back a cancelled move
    pub rollback_errors: Vec<ErrorRecord>,
}

impl MoveProgressInfo {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            phase: MovePhase::DiscoveringSourceFiles,
            total_files: 0,
            moved_files: 0,
            total_directories: 0,
            moved_directories: 0,
            total_bytes: 0,
            moved_bytes: 0,
            current_file: None,
            current_file_transferred: 0,
            current_file_total: 0,
            current_directory: None,
            started_at: now,
            updated_at: now,
            elapsed: Duration::ZERO,
            eta: None,
            deleted_files: 0,
            deleted_directories: 0,
            rollback_errors: Vec::new(),
        }
    }

    /// Copy progress in percent of bytes (of files when there are no bytes)
    pub fn percent(&self) -> f64 {
        if self.total_bytes > 0 {
            self.moved_bytes as f64 * 100.0 / self.total_bytes as f64
        } else if self.total_files > 0 {
            self.moved_files as f64 * 100.0 / self.total_files as f64
        } else {
            100.0
        }
    }
}

/// Outcome of [`MoveOperation::run`]
#[derive(Debug)]
pub enum MoveResult {
    /// Everything was copied and the sources deleted
    Completed(MoveProgressInfo),
    /// Validation or I/O failed; no rollback was attempted
    Failed(SyncError),
    /// Cancelled and rolled back; carries the final progress
    Cancelled(MoveProgressInfo),
}

impl MoveResult {
    /// Whether the move completed
    pub fn is_completed(&self) -> bool {
        matches!(self, MoveResult::Completed(_))
    }

    /// Whether the move was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MoveResult::Cancelled(_))
    }
}

/// Totals of one directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeTotals {
    /// Regular files
    pub files: u64,
    /// Reparse points
    pub links: u64,
    /// Directories, including the root
    pub directories: u64,
    /// Bytes in regular files
    pub bytes: u64,
}

impl TreeTotals {
    fn absorb(&mut self, other: TreeTotals) {
        self.files += other.files;
        self.links += other.links;
        self.directories += other.directories;
        self.bytes += other.bytes;
    }
}

/// Recursively total the tree under `root`
///
/// Reparse points are counted but never followed.
pub fn discover(fs: &dyn FileSystem, root: &Path) -> Result<TreeTotals> {
    discover_with(fs, root, &mut || Ok(()))
}

fn discover_with(fs: &dyn FileSystem, root: &Path, check: &mut dyn FnMut() -> Result<()>) -> Result<TreeTotals> {
    check()?;
    let mut totals = TreeTotals {
        directories: 1,
        ..TreeTotals::default()
    };
    for entry in fs.enumerate_entries(root)? {
        let entry = entry?;
        if entry.is_traversable_directory() {
            totals.absorb(discover_with(fs, entry.path(), check)?);
        } else if entry.is_reparse_point() {
            totals.links += 1;
        } else {
            totals.files += 1;
            totals.bytes += entry.size();
        }
    }
    Ok(totals)
}

/// Runs moves on a [`FileSystem`]
#[derive(Clone)]
pub struct MoveOperation {
    fs: Arc<dyn FileSystem>,
    report_interval: Duration,
}

impl std::fmt::Debug for MoveOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoveOperation")
            .field("report_interval", &self.report_interval)
            .finish()
    }
}

impl Default for MoveOperation {
    fn default() -> Self {
        Self::new()
    }
}

/// One validated unit of the move
#[derive(Debug)]
enum MoveItem {
    Directory {
        source: PathBuf,
        destination: PathBuf,
        /// The destination directory existed (empty) before the move
        existed: bool,
    },
    File {
        source: PathBuf,
        destination: PathBuf,
    },
}

impl MoveOperation {
    /// Move on the local disk
    pub fn new() -> Self {
        Self::with_file_system(Arc::new(LocalFileSystem::new()))
    }

    /// Move on a custom filesystem
    pub fn with_file_system(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    /// Minimum time between throttled progress reports
    ///
    /// Phase changes are always reported.
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Check that `group` can be moved under `destination_root` without changing anything
    pub fn validate(&self, group: &MoveGroup, destination_root: &Path) -> Result<()> {
        self.plan(group, destination_root).map(|_| ())
    }

    /// Move `group` under `destination_root`
    ///
    /// `on_progress` receives immutable snapshots: throttled to the report
    /// interval, except phase changes which are always delivered.
    pub fn run<F>(
        &self,
        group: &MoveGroup,
        destination_root: &Path,
        on_progress: F,
        cancellation: &CancellationToken,
    ) -> MoveResult
    where
        F: FnMut(&MoveProgressInfo),
    {
        let items = match self.plan(group, destination_root) {
            Ok(items) => items,
            Err(e) => {
                warn!("Move of {:?} rejected: {}", group.primary(), e);
                return MoveResult::Failed(e);
            }
        };
        info!(
            "Moving {:?} from {:?} to {:?}",
            group.primary(),
            group.source_root(),
            destination_root
        );

        let mut pipeline = Pipeline {
            fs: self.fs.as_ref(),
            cancellation,
            on_progress,
            throttle: Throttle::new(self.report_interval),
            info: MoveProgressInfo::new(),
            clock: Instant::now(),
            created: Vec::new(),
        };

        match pipeline.execute(&items) {
            Ok(()) => {
                info!(
                    "Moved {} files ({} bytes) in {:?}",
                    pipeline.info.moved_files, pipeline.info.moved_bytes, pipeline.info.elapsed
                );
                MoveResult::Completed(pipeline.info)
            }
            Err(e) if e.is_cancellation() => {
                info!("Move cancelled; rolling back {} destination paths", pipeline.created.len());
                pipeline.rollback();
                MoveResult::Cancelled(pipeline.info)
            }
            Err(e) => {
                warn!("Move failed, partial destination left in place: {}", e);
                MoveResult::Failed(e)
            }
        }
    }

    /// Pre-flight validation; reads only
    fn plan(&self, group: &MoveGroup, destination_root: &Path) -> Result<Vec<MoveItem>> {
        let source_root = group.source_root();
        if destination_root == source_root {
            return Err(SyncError::validation(format!(
                "destination root {:?} is the source root",
                destination_root
            )));
        }

        let mut items = Vec::new();
        for relative in group.directories() {
            check_relative(relative)?;
            let source = source_root.join(relative);
            let destination = destination_root.join(relative);
            let enclosing = group
                .directories()
                .map(|directory| source_root.join(directory))
                .find(|directory| destination.starts_with(directory));
            if let Some(enclosing) = enclosing {
                return Err(SyncError::validation(format!(
                    "destination {:?} lies inside source directory {:?}",
                    destination, enclosing
                )));
            }
            match self.fs.get_entry(&source)? {
                Some(entry) if entry.is_traversable_directory() => {}
                Some(entry) => {
                    return Err(SyncError::validation(format!(
                        "source {:?} is a {}, expected a directory",
                        source,
                        entry.describe_kind()
                    )))
                }
                None => return Err(SyncError::validation(format!("source directory {:?} does not exist", source))),
            }
            let existed = match self.fs.get_entry(&destination)? {
                None => false,
                Some(entry) if entry.is_traversable_directory() => {
                    if self.fs.enumerate_entries(&destination)?.next().is_some() {
                        return Err(SyncError::validation(format!(
                            "destination directory {:?} is not empty",
                            destination
                        )));
                    }
                    true
                }
                Some(entry) => {
                    return Err(SyncError::validation(format!(
                        "destination {:?} already exists as a {}",
                        destination,
                        entry.describe_kind()
                    )))
                }
            };
            items.push(MoveItem::Directory {
                source,
                destination,
                existed,
            });
        }

        for relative in group.side_files() {
            check_relative(relative)?;
            let source = source_root.join(relative);
            let destination = destination_root.join(relative);
            match self.fs.get_entry(&source)? {
                Some(entry) if !entry.is_directory() => {}
                Some(_) => return Err(SyncError::validation(format!("side file {:?} is a directory", source))),
                None => return Err(SyncError::validation(format!("side file {:?} does not exist", source))),
            }
            if self.fs.exists(&destination)? {
                return Err(SyncError::validation(format!(
                    "destination side file {:?} already exists",
                    destination
                )));
            }
            items.push(MoveItem::File { source, destination });
        }

        debug!("Move validated: {} items", items.len());
        Ok(items)
    }
}

fn check_relative(path: &Path) -> Result<()> {
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.as_os_str().is_empty() || escapes {
        return Err(SyncError::validation(format!(
            "{:?} must be a relative path inside the library root",
            path
        )));
    }
    Ok(())
}

/// Mutable state of one running move
struct Pipeline<'a, F> {
    fs: &'a dyn FileSystem,
    cancellation: &'a CancellationToken,
    on_progress: F,
    throttle: Throttle,
    info: MoveProgressInfo,
    clock: Instant,
    /// Destination paths this move created, in creation order
    created: Vec<PathBuf>,
}

impl<F: FnMut(&MoveProgressInfo)> Pipeline<'_, F> {
    fn execute(&mut self, items: &[MoveItem]) -> Result<()> {
        self.report(true);
        for item in items {
            let totals = match item {
                MoveItem::Directory { source, .. } => {
                    let cancellation = self.cancellation;
                    discover_with(self.fs, source, &mut || cancellation.check())?
                }
                MoveItem::File { source, .. } => {
                    self.cancellation.check()?;
                    side_file_totals(self.fs, source)?
                }
            };
            self.info.total_files += totals.files + totals.links;
            self.info.total_directories += totals.directories;
            self.info.total_bytes += totals.bytes;
        }
        debug!(
            "Discovered {} files, {} directories, {} bytes",
            self.info.total_files, self.info.total_directories, self.info.total_bytes
        );

        self.enter(MovePhase::CopyingFiles);
        for item in items {
            match item {
                MoveItem::Directory {
                    source,
                    destination,
                    existed,
                } => {
                    if !existed {
                        self.create_parents(destination)?;
                    }
                    self.copy_tree(source, destination)?;
                }
                MoveItem::File { source, destination } => {
                    self.create_parents(destination)?;
                    let entry = self
                        .fs
                        .get_entry(source)?
                        .ok_or_else(|| SyncError::NotFound(source.clone()))?;
                    self.copy_one(&entry, destination)?;
                }
            }
        }

        // Past this point the move can no longer be cancelled
        self.enter(MovePhase::DeletingSourceDirectory);
        for item in items {
            match item {
                MoveItem::Directory { source, .. } => self.delete_source_tree(source)?,
                MoveItem::File { source, .. } => {
                    if let Some(entry) = self.fs.get_entry(source)? {
                        self.fs.delete_entry(&entry)?;
                        self.info.deleted_files += 1;
                    }
                }
            }
            self.report(false);
        }
        self.report(true);
        Ok(())
    }

    fn copy_tree(&mut self, source: &Path, destination: &Path) -> Result<()> {
        self.cancellation.check()?;
        self.info.current_directory = Some(source.to_path_buf());
        if !self.fs.exists(destination)? {
            self.fs.create_directory(destination)?;
            self.created.push(destination.to_path_buf());
            trace!("Created {:?}", destination);
        }
        self.info.moved_directories += 1;
        self.report(false);

        let children: Vec<Entry> = self.fs.enumerate_entries(source)?.collect::<Result<_>>()?;
        for child in &children {
            self.cancellation.check()?;
            let target = destination.join(child.name());
            if child.is_traversable_directory() {
                self.copy_tree(child.path(), &target)?;
            } else {
                self.copy_one(child, &target)?;
            }
        }
        Ok(())
    }

    /// Copy one file or link
    fn copy_one(&mut self, source: &Entry, destination: &Path) -> Result<()> {
        self.cancellation.check()?;
        self.info.current_file = Some(source.path().to_path_buf());
        self.info.current_file_transferred = 0;
        self.info.current_file_total = source.size();

        // Anything already here appeared after validation; leave it alone
        if self.fs.exists(destination)? {
            return Err(SyncError::AlreadyExists(destination.to_path_buf()));
        }
        if source.is_reparse_point() {
            let target = self.fs.get_reparse_target(source.path())?;
            match source.reparse() {
                Some(ReparseKind::Unsupported) => {
                    return Err(SyncError::UnsupportedReparsePoint(source.path().to_path_buf()))
                }
                Some(ReparseKind::Junction) => self.fs.create_junction_point(destination, &target)?,
                _ => self
                    .fs
                    .create_symbolic_link(destination, &target, source.is_directory())?,
            }
            self.created.push(destination.to_path_buf());
            self.fs.set_last_write_time(destination, source.last_write_time())?;
        } else {
            // Recorded before the copy so a cancelled partial file is rolled back too
            self.created.push(destination.to_path_buf());
            let base = self.info.moved_bytes;
            let fs = self.fs;
            let cancellation = self.cancellation;
            fs.copy_file(source.path(), destination, &mut |transferred, total| {
                self.info.current_file_transferred = transferred;
                self.info.current_file_total = total;
                self.info.moved_bytes = base + transferred;
                self.report(false);
                if cancellation.is_cancelled() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })?;
        }

        self.info.moved_files += 1;
        self.report(false);
        Ok(())
    }

    /// Create missing ancestors of `path`, remembering each for rollback
    fn create_parents(&mut self, path: &Path) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let mut missing = Vec::new();
        let mut cursor = Some(parent);
        while let Some(dir) = cursor {
            if dir.as_os_str().is_empty() || self.fs.exists(dir)? {
                break;
            }
            missing.push(dir.to_path_buf());
            cursor = dir.parent();
        }
        if missing.is_empty() {
            return Ok(());
        }
        self.fs.create_directory(parent)?;
        // Outermost first, so rollback removes them innermost first
        self.created.extend(missing.into_iter().rev());
        Ok(())
    }

    fn delete_source_tree(&mut self, directory: &Path) -> Result<()> {
        self.info.current_directory = Some(directory.to_path_buf());
        let children: Vec<Entry> = self.fs.enumerate_entries(directory)?.collect::<Result<_>>()?;
        for child in &children {
            if child.is_traversable_directory() {
                self.delete_source_tree(child.path())?;
            } else {
                self.fs.delete_entry(child)?;
                self.info.deleted_files += 1;
                self.report(false);
            }
        }
        let entry = self
            .fs
            .get_entry(directory)?
            .ok_or_else(|| SyncError::NotFound(directory.to_path_buf()))?;
        self.fs.delete_entry(&entry)?;
        self.info.deleted_directories += 1;
        Ok(())
    }

    /// Best-effort removal of everything this move created, newest first
    fn rollback(&mut self) {
        self.enter(MovePhase::DeletingDestinationAfterCancellation);
        let created = std::mem::take(&mut self.created);
        for path in created.iter().rev() {
            let outcome = self.fs.get_entry(path).and_then(|entry| match entry {
                Some(entry) => self.fs.delete_entry(&entry).map(|()| Some(entry)),
                None => Ok(None),
            });
            match outcome {
                Ok(Some(entry)) => {
                    if entry.is_traversable_directory() {
                        self.info.deleted_directories += 1;
                    } else {
                        self.info.deleted_files += 1;
                    }
                    trace!("Rolled back {:?}", path);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Rollback could not delete {:?}: {}", path, e);
                    self.info.rollback_errors.push(ErrorRecord {
                        path: path.clone(),
                        message: e.to_string(),
                    });
                }
            }
            self.report(false);
        }
        self.report(true);
    }

    fn enter(&mut self, phase: MovePhase) {
        debug!("Move phase: {:?}", phase);
        self.info.phase = phase;
        self.info.current_file = None;
        self.info.current_directory = None;
        self.info.deleted_files = 0;
        self.info.deleted_directories = 0;
        self.report(true);
    }

    /// Refresh timing and notify, unless throttled
    fn report(&mut self, force: bool) {
        if force {
            self.throttle.fire();
        } else if !self.throttle.ready() {
            return;
        }
        self.info.updated_at = Utc::now();
        self.info.elapsed = self.clock.elapsed();
        self.info.eta = estimate_remaining(self.info.elapsed, self.info.moved_bytes, self.info.total_bytes);
        (self.on_progress)(&self.info);
    }
}

fn side_file_totals(fs: &dyn FileSystem, source: &Path) -> Result<TreeTotals> {
    let entry = fs
        .get_entry(source)?
        .ok_or_else(|| SyncError::NotFound(source.to_path_buf()))?;
    Ok(if entry.is_reparse_point() {
        TreeTotals {
            links: 1,
            ..TreeTotals::default()
        }
    } else {
        TreeTotals {
            files: 1,
            bytes: entry.size(),
            ..TreeTotals::default()
        }
    })
}
