//! Filesystem capability consumed by the synchronizer and the mover
//!
//! Everything the engine does to disk goes through the [`FileSystem`] trait so
//! that tests can wrap the real implementation and inject failures or delays.
//! [`LocalFileSystem`] is the production implementation on top of `std::fs`
//! and `filetime`.
//!
//! ## Cross-Platform Behavior
//!
//! - **Unix**: symbolic links are the only reparse points; a "junction" is
//!   created as a plain directory symlink.
//! - **Windows**: symbolic links are created with `symlink_dir`/`symlink_file`;
//!   creating junctions is not supported and reports
//!   [`SyncError::UnsupportedReparsePoint`].
//!
//! ## Thread Safety
//!
//! Implementations must be `Send + Sync`; the synchronizer calls them from
//! every worker thread at once.

use crate::entry::Entry;
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Default size of one copy chunk (and therefore one progress tick)
pub const DEFAULT_COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Lazy, single pass sequence of directory children
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<Entry>> + Send + 'a>;

/// Progress callback for [`FileSystem::copy_file`]
///
/// Receives `(transferred, total)` bytes after every chunk. Returning
/// `ControlFlow::Break(())` stops the copy, which then fails with
/// [`SyncError::Cancelled`] and leaves the partial destination in place.
pub type CopyProgress<'a> = dyn FnMut(u64, u64) -> ControlFlow<()> + 'a;

/// Abstract filesystem operations
pub trait FileSystem: Send + Sync {
    /// Snapshot the object at `path`, or `None` if nothing is there
    fn get_entry(&self, path: &Path) -> Result<Option<Entry>>;

    /// Enumerate the children of a directory
    fn enumerate_entries<'a>(&'a self, directory: &Path) -> Result<EntryIter<'a>>;

    /// Copy file contents, reporting progress per chunk, preserving the write time
    fn copy_file(&self, source: &Path, destination: &Path, progress: &mut CopyProgress<'_>) -> Result<()>;

    /// Delete a file, a link, or an empty directory
    fn delete_entry(&self, entry: &Entry) -> Result<()>;

    /// Create a directory and any missing parents
    fn create_directory(&self, path: &Path) -> Result<()>;

    /// Create a symbolic link at `path` pointing at `target`
    fn create_symbolic_link(&self, path: &Path, target: &Path, target_is_dir: bool) -> Result<()>;

    /// Create a directory junction at `path` pointing at `target`
    fn create_junction_point(&self, path: &Path, target: &Path) -> Result<()>;

    /// Read the raw target of a reparse point
    fn get_reparse_target(&self, path: &Path) -> Result<PathBuf>;

    /// Set the last write time of `path` without following links
    fn set_last_write_time(&self, path: &Path, time: DateTime<Utc>) -> Result<()>;

    /// Whether anything exists at `path`
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.get_entry(path)?.is_some())
    }
}

/// [`FileSystem`] backed by the local disk
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    chunk_size: usize,
}

impl LocalFileSystem {
    /// Create with the default copy chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_COPY_CHUNK_SIZE,
        }
    }

    /// Use a specific copy chunk size (minimum 4 KiB)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(4096);
        self
    }

    /// Copy chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for LocalFileSystem {
    fn get_entry(&self, path: &Path) -> Result<Option<Entry>> {
        match fs::symlink_metadata(path) {
            Ok(metadata) => {
                let target_is_dir = metadata.file_type().is_symlink()
                    && fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false);
                Ok(Some(Entry::from_metadata(path, &metadata, target_is_dir)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::io_at(path, e)),
        }
    }

    fn enumerate_entries<'a>(&'a self, directory: &Path) -> Result<EntryIter<'a>> {
        let read_dir = fs::read_dir(directory).map_err(|e| SyncError::io_at(directory, e))?;
        Ok(Box::new(read_dir.map(|item| {
            let item = item?;
            let path = item.path();
            let metadata = item.metadata().map_err(|e| SyncError::io_at(&path, e))?;
            let target_is_dir = metadata.file_type().is_symlink()
                && fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false);
            Ok(Entry::from_metadata(path, &metadata, target_is_dir))
        })))
    }

    fn copy_file(&self, source: &Path, destination: &Path, progress: &mut CopyProgress<'_>) -> Result<()> {
        let mut reader = File::open(source).map_err(|e| SyncError::io_at(source, e))?;
        let metadata = reader.metadata().map_err(|e| SyncError::io_at(source, e))?;
        let total = metadata.len();
        let mut writer = create_writable(destination).map_err(|e| SyncError::io_at(destination, e))?;

        let mut buffer = vec![0u8; self.chunk_size.min(total.max(1) as usize).max(1)];
        let mut transferred = 0u64;
        loop {
            let read = reader.read(&mut buffer).map_err(|e| SyncError::io_at(source, e))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .map_err(|e| SyncError::io_at(destination, e))?;
            transferred += read as u64;
            if progress(transferred, total).is_break() {
                trace!("Copy of {:?} stopped at {} of {} bytes", source, transferred, total);
                return Err(SyncError::Cancelled);
            }
        }
        if transferred == 0 && progress(0, total).is_break() {
            return Err(SyncError::Cancelled);
        }
        writer.flush().map_err(|e| SyncError::io_at(destination, e))?;
        drop(writer);

        fs::set_permissions(destination, metadata.permissions())
            .map_err(|e| SyncError::io_at(destination, e))?;
        let mtime = FileTime::from_last_modification_time(&metadata);
        filetime::set_file_mtime(destination, mtime).map_err(|e| SyncError::io_at(destination, e))?;
        Ok(())
    }

    fn delete_entry(&self, entry: &Entry) -> Result<()> {
        let path = entry.path();
        let result = if entry.is_reparse_point() {
            remove_link(path, entry.is_directory())
        } else if entry.is_directory() {
            fs::remove_dir(path)
        } else {
            remove_file_forced(path)
        };
        result.map_err(|e| {
            let has_children = entry.is_traversable_directory()
                && fs::read_dir(path).map(|mut d| d.next().is_some()).unwrap_or(false);
            if has_children {
                SyncError::DirectoryNotEmpty(path.to_path_buf())
            } else {
                SyncError::io_at(path, e)
            }
        })?;
        trace!("Deleted {} {:?}", entry.describe_kind(), path);
        Ok(())
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| SyncError::io_at(path, e))
    }

    fn create_symbolic_link(&self, path: &Path, target: &Path, target_is_dir: bool) -> Result<()> {
        create_symlink(target, path, target_is_dir).map_err(|e| SyncError::io_at(path, e))
    }

    #[cfg(unix)]
    fn create_junction_point(&self, path: &Path, target: &Path) -> Result<()> {
        create_symlink(target, path, true).map_err(|e| SyncError::io_at(path, e))
    }

    #[cfg(not(unix))]
    fn create_junction_point(&self, path: &Path, _target: &Path) -> Result<()> {
        Err(SyncError::UnsupportedReparsePoint(path.to_path_buf()))
    }

    fn get_reparse_target(&self, path: &Path) -> Result<PathBuf> {
        fs::read_link(path).map_err(|e| SyncError::io_at(path, e))
    }

    fn set_last_write_time(&self, path: &Path, time: DateTime<Utc>) -> Result<()> {
        let ft = FileTime::from_unix_time(time.timestamp(), time.timestamp_subsec_nanos());
        filetime::set_symlink_file_times(path, ft, ft).map_err(|e| SyncError::io_at(path, e))
    }
}

/// Create a symlink (cross-platform)
#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path, _target_is_dir: bool) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

/// Create a symlink (Windows)
#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path, target_is_dir: bool) -> std::io::Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};
    if target_is_dir {
        symlink_dir(target, link)
    } else {
        symlink_file(target, link)
    }
}

#[cfg(unix)]
fn remove_link(path: &Path, _is_dir: bool) -> std::io::Result<()> {
    fs::remove_file(path)
}

#[cfg(windows)]
fn remove_link(path: &Path, is_dir: bool) -> std::io::Result<()> {
    if is_dir {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

/// Remove a file, clearing the read-only flag if that is what blocks it
fn remove_file_forced(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            let mut permissions = fs::symlink_metadata(path)?.permissions();
            if !permissions.readonly() {
                return Err(e);
            }
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(path, permissions)?;
            fs::remove_file(path)
        }
        other => other,
    }
}

/// `File::create`, clearing the read-only flag a previous copy carried over
fn create_writable(path: &Path) -> std::io::Result<File> {
    match File::create(path) {
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            let metadata = fs::symlink_metadata(path)?;
            let mut permissions = metadata.permissions();
            if !metadata.is_file() || !permissions.readonly() {
                return Err(e);
            }
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(path, permissions)?;
            File::create(path)
        }
        other => other,
    }
}
