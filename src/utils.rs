//! Utility functions for treesync
//!
//! Small helpers shared by the synchronizer, the mover and the command line
//! front end.
//!
//! ## Categories of Utilities
//!
//! ### Path Manipulation
//! - Converting absolute paths to relative paths
//! - Re-rooting a path from one tree into another
//!
//! ### Reporting
//! - Byte formatting (human-readable sizes)
//! - Remaining-time estimates from partial progress
//!
//! ## Example Usage
//!
//! ```rust
//! use treesync::utils::{format_bytes, rebase};
//! use std::path::Path;
//!
//! # fn example() -> treesync::Result<()> {
//! let moved = rebase(Path::new("/lib/common/Game/data"), Path::new("/lib"), Path::new("/new"))?;
//! assert_eq!(moved, Path::new("/new/common/Game/data"));
//! assert_eq!(format_bytes(1536), "1.50 KB");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::error::{Result, SyncError};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Make a path relative to a base path
///
/// The strip is purely lexical so symbolic links keep their own path instead
/// of resolving to their target.
///
/// # Errors
///
/// - [`SyncError::Internal`] if the path is not under the base path
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .map_err(|_| SyncError::internal(format!("Path {:?} is not relative to {:?}", path, base)))
}

/// Map `path` from under `from_root` to the same relative location under `to_root`
pub fn rebase(path: &Path, from_root: &Path, to_root: &Path) -> Result<PathBuf> {
    Ok(to_root.join(make_relative(path, from_root)?))
}

/// Format bytes in human-readable form
///
/// Converts a byte count into a human-readable string using appropriate
/// units (B, KB, MB, GB, TB, PB). Uses 1024 as the conversion factor
/// following binary conventions.
///
/// # Example
///
/// ```rust
/// use treesync::utils::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 B");
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(1_048_576), "1.00 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Estimate remaining time from the fraction of work done so far
///
/// Computes `elapsed / (done / total) - elapsed`. Early samples are too noisy
/// to extrapolate from, so the estimate is `None` until more than one second
/// has elapsed and at least one unit of work is done.
pub fn estimate_remaining(elapsed: Duration, done: u64, total: u64) -> Option<Duration> {
    if elapsed <= Duration::from_secs(1) || done == 0 || total == 0 {
        return None;
    }
    let fraction = (done as f64 / total as f64).min(1.0);
    let projected = elapsed.as_secs_f64() / fraction;
    Some(Duration::from_secs_f64((projected - elapsed.as_secs_f64()).max(0.0)))
}
