//! Immutable filesystem entry snapshots
//!
//! An [`Entry`] captures the identity of one filesystem object at the moment
//! it was observed: its path, whether it is a file or a directory, whether it
//! is a reparse point (symbolic link or junction), its size and its last write
//! time. Entries are produced by a [`FileSystem`](crate::fs::FileSystem) and
//! never change afterwards.
//!
//! ## Comparison
//!
//! Two entries describe "the same file" when kind, reparse-ness, size, name and
//! last write time all match. Names compare case-insensitively. For reparse
//! points the link targets must also match; that check needs filesystem access
//! and lives in [`EntryComparer`](crate::sync::EntryComparer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

/// Base kind of a filesystem object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file, or a link that points at one
    File,
    /// Directory, or a link that points at one
    Directory,
}

/// Flavor of reparse point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReparseKind {
    /// Symbolic link
    SymbolicLink,
    /// Directory junction (mount point)
    Junction,
    /// Any other reparse tag; cannot be reproduced
    Unsupported,
}

/// Snapshot of one filesystem object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    path: PathBuf,
    kind: EntryKind,
    reparse: Option<ReparseKind>,
    size: u64,
    last_write_time: DateTime<Utc>,
}

impl Entry {
    /// Create an entry for a plain file or directory
    pub fn new(path: impl Into<PathBuf>, kind: EntryKind, size: u64, last_write_time: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            kind,
            reparse: None,
            size: if kind == EntryKind::Directory { 0 } else { size },
            last_write_time,
        }
    }

    /// Mark the entry as a reparse point of the given flavor
    pub fn with_reparse(mut self, reparse: ReparseKind) -> Self {
        self.reparse = Some(reparse);
        self
    }

    /// Build an entry from `symlink_metadata` output
    ///
    /// `target_is_dir` is only consulted for symbolic links and tells whether
    /// the link points at a directory.
    pub fn from_metadata(path: impl Into<PathBuf>, metadata: &Metadata, target_is_dir: bool) -> Self {
        let path = path.into();
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        let file_type = metadata.file_type();

        if file_type.is_symlink() {
            let kind = if target_is_dir { EntryKind::Directory } else { EntryKind::File };
            return Entry::new(path, kind, metadata.len(), modified).with_reparse(reparse_kind(metadata));
        }

        let kind = if file_type.is_dir() { EntryKind::Directory } else { EntryKind::File };
        let entry = Entry::new(path, kind, metadata.len(), modified);
        match foreign_reparse_kind(metadata) {
            Some(reparse) => entry.with_reparse(reparse),
            None => entry,
        }
    }

    /// Full path of the object
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base kind
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Reparse flavor, if this entry is a reparse point
    pub fn reparse(&self) -> Option<ReparseKind> {
        self.reparse
    }

    /// Size in bytes (always 0 for directories)
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Last write time in UTC
    pub fn last_write_time(&self) -> DateTime<Utc> {
        self.last_write_time
    }

    /// Final path component
    pub fn name(&self) -> &OsStr {
        self.path.file_name().unwrap_or(self.path.as_os_str())
    }

    /// Case-insensitive comparison key for the name
    pub fn name_key(&self) -> String {
        name_key(self.name())
    }

    /// Whether this is a reparse point
    pub fn is_reparse_point(&self) -> bool {
        self.reparse.is_some()
    }

    /// Whether the base kind is directory (links to directories included)
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Directory that may be descended into; reparse points never are
    pub fn is_traversable_directory(&self) -> bool {
        self.is_directory() && !self.is_reparse_point()
    }

    /// Regular file that is not a reparse point
    pub fn is_regular_file(&self) -> bool {
        self.kind == EntryKind::File && !self.is_reparse_point()
    }

    /// Whether both entries have the same kind and reparse-ness
    pub fn same_kind(&self, other: &Entry) -> bool {
        self.kind == other.kind && self.is_reparse_point() == other.is_reparse_point()
    }

    /// Metadata-level equality: kind, reparse-ness, size, name and write time
    pub fn matches(&self, other: &Entry) -> bool {
        self.same_kind(other)
            && self.size == other.size
            && self.last_write_time == other.last_write_time
            && self.name_key() == other.name_key()
    }

    /// Short human readable description of the kind
    pub fn describe_kind(&self) -> &'static str {
        match (self.kind, self.reparse) {
            (_, Some(ReparseKind::Junction)) => "junction",
            (EntryKind::Directory, Some(_)) => "directory link",
            (EntryKind::File, Some(_)) => "file link",
            (EntryKind::Directory, None) => "directory",
            (EntryKind::File, None) => "file",
        }
    }
}

/// Case-insensitive key for a file name
pub fn name_key(name: &OsStr) -> String {
    name.to_string_lossy().to_lowercase()
}

#[cfg(windows)]
fn reparse_kind(metadata: &Metadata) -> ReparseKind {
    use std::os::windows::fs::FileTypeExt;
    let file_type = metadata.file_type();
    if file_type.is_symlink_dir() || file_type.is_symlink_file() {
        ReparseKind::SymbolicLink
    } else {
        ReparseKind::Junction
    }
}

#[cfg(not(windows))]
fn reparse_kind(_metadata: &Metadata) -> ReparseKind {
    ReparseKind::SymbolicLink
}

/// Reparse points std does not report as symlinks
#[cfg(windows)]
fn foreign_reparse_kind(metadata: &Metadata) -> Option<ReparseKind> {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
    if metadata.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
        Some(ReparseKind::Unsupported)
    } else {
        None
    }
}

#[cfg(not(windows))]
fn foreign_reparse_kind(_metadata: &Metadata) -> Option<ReparseKind> {
    None
}
