//! Persistent configuration
//!
//! [`SyncConfig`] gathers every tunable of the engine in one serde structure
//! that is stored as pretty-printed JSON. Missing fields take their defaults,
//! so a config file only needs the values it changes:
//!
//! ```json
//! {
//!   "workers": 8,
//!   "options": { "skip_identical_files": true, "delete_extra_files": true },
//!   "exclude": ["*.tmp", "Thumbs.db"]
//! }
//! ```

use crate::error::{Result, SyncError};
use crate::fs::DEFAULT_COPY_CHUNK_SIZE;
use crate::mover::MoveOperation;
use crate::sync::SynchronizerBuilder;
use crate::types::CopyOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Worker threads for the synchronizer
    pub workers: usize,
    /// Copy chunk size in bytes; one progress report per chunk
    pub chunk_size: usize,
    /// How often a waiting caller polls the root task, in milliseconds
    pub poll_interval_ms: u64,
    /// Minimum time between two progress pulses, in milliseconds
    pub pulse_interval_ms: u64,
    /// Copy and delete behavior
    pub options: CopyOptions,
    /// Extra exclude patterns, merged with `options.exclude`
    pub exclude: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            chunk_size: DEFAULT_COPY_CHUNK_SIZE,
            poll_interval_ms: 50,
            pulse_interval_ms: 250,
            options: CopyOptions::default(),
            exclude: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Read a config file
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| SyncError::io_at(path, e))?;
        let config: SyncConfig = serde_json::from_str(&json)?;
        config.validate()?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Write this config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| SyncError::io_at(path, e))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SyncError::InvalidConfiguration("workers must be at least 1".into()));
        }
        if self.chunk_size < 4096 {
            return Err(SyncError::InvalidConfiguration(format!(
                "chunk_size must be at least 4096 bytes, got {}",
                self.chunk_size
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(SyncError::InvalidConfiguration("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pulse interval as a duration
    pub fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms)
    }

    /// Copy options with the top-level excludes merged in
    pub fn effective_options(&self) -> CopyOptions {
        self.options.clone().exclude(self.exclude.iter().cloned())
    }

    /// Synchronizer builder preloaded with this config
    pub fn synchronizer(&self) -> SynchronizerBuilder {
        SynchronizerBuilder::new()
            .workers(self.workers)
            .chunk_size(self.chunk_size)
            .options(self.effective_options())
    }

    /// Move operation on the local disk reporting at the pulse interval
    pub fn move_operation(&self) -> MoveOperation {
        MoveOperation::new().report_interval(self.pulse_interval())
    }
}
