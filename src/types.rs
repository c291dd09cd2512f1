//! Core option and control types shared by the synchronizer and the mover
//!
//! ## Examples
//!
//! ```rust
//! use treesync::types::{CopyOptions, DeletePolicy};
//!
//! let options = CopyOptions::new()
//!     .skip_identical_files(true)
//!     .delete_extra_files(true);
//!
//! assert_eq!(options.delete_policy(), DeletePolicy::Extra);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flags controlling what the synchronizer copies and deletes
///
/// The two delete flags are not independent in effect: when both are set,
/// `delete_extra_files` wins because it already covers every entry that
/// `delete_mismatched_files` would remove.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    /// Do not re-copy destination files that compare equal to the source
    #[serde(default)]
    pub skip_identical_files: bool,
    /// Delete destination entries that have no source counterpart
    #[serde(default)]
    pub delete_extra_files: bool,
    /// Delete destination entries whose kind differs from the same-named source entry
    #[serde(default)]
    pub delete_mismatched_files: bool,
    /// Glob patterns matched against entry names; matches are left untouched
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl CopyOptions {
    /// Options that copy everything and delete nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a full mirror: skip identical files, delete extras
    pub fn mirror() -> Self {
        Self::new().skip_identical_files(true).delete_extra_files(true)
    }

    /// Set `skip_identical_files`
    pub fn skip_identical_files(mut self, value: bool) -> Self {
        self.skip_identical_files = value;
        self
    }

    /// Set `delete_extra_files`
    pub fn delete_extra_files(mut self, value: bool) -> Self {
        self.delete_extra_files = value;
        self
    }

    /// Set `delete_mismatched_files`
    pub fn delete_mismatched_files(mut self, value: bool) -> Self {
        self.delete_mismatched_files = value;
        self
    }

    /// Add exclude patterns
    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// The delete behavior that actually applies
    pub fn delete_policy(&self) -> DeletePolicy {
        if self.delete_extra_files {
            DeletePolicy::Extra
        } else if self.delete_mismatched_files {
            DeletePolicy::Mismatched
        } else {
            DeletePolicy::None
        }
    }
}

/// Effective deletion behavior derived from [`CopyOptions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletePolicy {
    /// Never delete destination entries
    None,
    /// Delete same-named destination entries of a different kind
    Mismatched,
    /// Delete every destination entry without a matching source entry
    Extra,
}

/// Cooperative cancellation flag shared between a caller and running work
///
/// Cloning produces another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(SyncError::Cancelled)` once cancellation was requested
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(crate::error::SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
