//! Error types for the treesync library
//!
//! This module defines every error that can surface from synchronization,
//! move, scheduling and configuration operations. Per-entry errors are usually
//! recorded into [`Statistics`](crate::stats::Statistics) instead of being
//! returned, so most variants carry the path they relate to.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the treesync library
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for all treesync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error tied to a specific path
    #[error("IO error at {path:?}: {source}")]
    PathIo {
        /// Path the operation was applied to
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A filesystem object that was required does not exist
    #[error("Not found: {0:?}")]
    NotFound(PathBuf),

    /// A filesystem object exists where none was expected
    #[error("Already exists: {0:?}")]
    AlreadyExists(PathBuf),

    /// Directory was expected to be empty
    #[error("Directory is not empty: {0:?}")]
    DirectoryNotEmpty(PathBuf),

    /// Source and destination disagree on the kind of an entry
    #[error("Kind mismatch at {path:?}: source is {source_kind}, destination is {destination_kind}")]
    KindMismatch {
        /// Destination path
        path: PathBuf,
        /// Description of the source kind
        source_kind: String,
        /// Description of the destination kind
        destination_kind: String,
    },

    /// Reparse point that cannot be reproduced
    #[error("Unsupported reparse point: {0:?}")]
    UnsupportedReparsePoint(PathBuf),

    /// Pre-flight validation failed before any I/O was attempted
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The operation observed a cancellation request
    #[error("Operation cancelled")]
    Cancelled,

    /// A scheduler task panicked while running
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// Worker thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// The scheduler has shut down and can no longer accept work
    #[error("Scheduler is shut down")]
    SchedulerShutdown,

    /// Pattern parsing error
    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<globset::Error> for SyncError {
    fn from(err: globset::Error) -> Self {
        SyncError::InvalidPattern(err.to_string())
    }
}

impl SyncError {
    /// Wrap an I/O error with the path it happened on
    ///
    /// `NotFound` I/O errors are mapped to [`SyncError::NotFound`] so callers
    /// can match on them without inspecting the io kind.
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => SyncError::NotFound(path),
            _ => SyncError::PathIo { path, source },
        }
    }

    /// Create a validation error with a custom message
    pub fn validation(msg: impl Into<String>) -> Self {
        SyncError::Validation(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SyncError::Internal(msg.into())
    }

    /// Check if this error is a cancellation signal rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// Check if this error means the object was missing
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::NotFound(_) => true,
            SyncError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Path the error relates to, if any
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            SyncError::PathIo { path, .. }
            | SyncError::KindMismatch { path, .. }
            | SyncError::NotFound(path)
            | SyncError::AlreadyExists(path)
            | SyncError::DirectoryNotEmpty(path)
            | SyncError::UnsupportedReparsePoint(path) => Some(path),
            _ => None,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SyncError::AlreadyExists(path) => {
                format!("{:?} already exists at the destination. Remove it or pick another destination.", path)
            }
            SyncError::DirectoryNotEmpty(path) => {
                format!("Destination directory {:?} is not empty. Moves only write into empty or missing directories.", path)
            }
            SyncError::PathIo { path, source } if source.kind() == std::io::ErrorKind::PermissionDenied => {
                format!("Permission denied for {:?}. Check file permissions or run with appropriate privileges.", path)
            }
            _ => self.to_string(),
        }
    }
}
