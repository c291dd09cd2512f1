//! Chaos testing for treesync
//!
//! Wraps the local filesystem with injected faults and races cancellation
//! against running work, then checks that failures are contained: mirror
//! runs record the error and finish the rest, moves fail without touching
//! the source and roll back only when cancelled.

use super::tree_snapshot;
use ::treesync::fs::{CopyProgress, EntryIter};
use ::treesync::*;
use chrono::{DateTime, Utc};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Local filesystem that fails chosen operations on entries with a given name
#[derive(Debug, Default)]
pub struct FaultyFileSystem {
    inner: LocalFileSystem,
    fail_copy: Option<String>,
    fail_enumerate: Option<String>,
    fail_delete: Option<String>,
    injected: AtomicUsize,
}

impl FaultyFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail copies whose source is named `name`
    pub fn fail_copy(mut self, name: &str) -> Self {
        self.fail_copy = Some(name.to_string());
        self
    }

    /// Fail listing directories named `name`
    pub fn fail_enumerate(mut self, name: &str) -> Self {
        self.fail_enumerate = Some(name.to_string());
        self
    }

    /// Fail deleting entries named `name`
    pub fn fail_delete(mut self, name: &str) -> Self {
        self.fail_delete = Some(name.to_string());
        self
    }

    /// Number of faults injected so far
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn trip(&self, rule: &Option<String>, path: &Path) -> Result<()> {
        match rule {
            Some(name) if path.file_name() == Some(OsStr::new(name)) => {
                self.injected.fetch_add(1, Ordering::SeqCst);
                info!("Injecting fault at {:?}", path);
                Err(SyncError::io_at(path, io::Error::other("injected fault")))
            }
            _ => Ok(()),
        }
    }
}

impl FileSystem for FaultyFileSystem {
    fn get_entry(&self, path: &Path) -> Result<Option<Entry>> {
        self.inner.get_entry(path)
    }

    fn enumerate_entries<'a>(&'a self, directory: &Path) -> Result<EntryIter<'a>> {
        self.trip(&self.fail_enumerate, directory)?;
        self.inner.enumerate_entries(directory)
    }

    fn copy_file(&self, source: &Path, destination: &Path, progress: &mut CopyProgress<'_>) -> Result<()> {
        self.trip(&self.fail_copy, source)?;
        self.inner.copy_file(source, destination, progress)
    }

    fn delete_entry(&self, entry: &Entry) -> Result<()> {
        self.trip(&self.fail_delete, entry.path())?;
        self.inner.delete_entry(entry)
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        self.inner.create_directory(path)
    }

    fn create_symbolic_link(&self, path: &Path, target: &Path, target_is_dir: bool) -> Result<()> {
        self.inner.create_symbolic_link(path, target, target_is_dir)
    }

    fn create_junction_point(&self, path: &Path, target: &Path) -> Result<()> {
        self.inner.create_junction_point(path, target)
    }

    fn get_reparse_target(&self, path: &Path) -> Result<PathBuf> {
        self.inner.get_reparse_target(path)
    }

    fn set_last_write_time(&self, path: &Path, time: DateTime<Utc>) -> Result<()> {
        self.inner.set_last_write_time(path, time)
    }
}

fn write_file(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn synchronizer(fs: Arc<FaultyFileSystem>, options: CopyOptions) -> Synchronizer {
        Synchronizer::builder()
            .workers(3)
            .file_system(fs)
            .options(options)
            .build()
            .unwrap()
    }

    #[test]
    fn test_copy_failure_is_recorded_and_run_continues() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        write_file(source.path(), "ok/one.txt", b"one");
        write_file(source.path(), "ok/bad.bin", b"bad");
        write_file(source.path(), "two.txt", b"two");

        let fs = Arc::new(FaultyFileSystem::new().fail_copy("bad.bin"));
        let stats = synchronizer(Arc::clone(&fs), CopyOptions::new())
            .synchronize_paths(source.path(), destination.path())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(fs.injected(), 1);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].path.ends_with("bad.bin"));
        assert!(stats.errors[0].message.contains("injected fault"));
        assert_eq!(stats.files_copied, 2);
        assert!(!stats.is_complete());
        assert!(destination.path().join("ok/one.txt").exists());
    }

    #[test]
    fn test_unlistable_subdirectory_is_skipped() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        write_file(source.path(), "locked/secret.txt", b"secret");
        write_file(source.path(), "open/public.txt", b"public");
        write_file(source.path(), "root.txt", b"root");

        let fs = Arc::new(FaultyFileSystem::new().fail_enumerate("locked"));
        let stats = synchronizer(fs, CopyOptions::mirror())
            .synchronize_paths(source.path(), destination.path())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].path.ends_with("locked"));
        assert_eq!(stats.files_copied, 2);
        assert!(!destination.path().join("locked/secret.txt").exists());
        assert!(destination.path().join("open/public.txt").exists());
    }

    #[test]
    fn test_failed_delete_keeps_the_rest_of_the_mirror() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        write_file(source.path(), "wanted.txt", b"wanted");
        write_file(destination.path(), "stuck.txt", b"stuck");
        write_file(destination.path(), "stale.txt", b"stale");

        let fs = Arc::new(FaultyFileSystem::new().fail_delete("stuck.txt"));
        let stats = synchronizer(fs, CopyOptions::mirror())
            .synchronize_paths(source.path(), destination.path())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.files_deleted, 1);
        assert_eq!(stats.files_copied, 1);
        assert!(destination.path().join("stuck.txt").exists());
        assert!(!destination.path().join("stale.txt").exists());
    }

    #[test]
    fn test_failed_move_leaves_partial_destination_and_source() {
        let temp_dir = TempDir::new().unwrap();
        let source_root = temp_dir.path().join("library");
        let destination_root = temp_dir.path().join("fast");
        write_file(&source_root, "common/Game/game.exe", b"binary");
        write_file(&source_root, "common/Game/data/level.dat", b"level");
        write_file(&source_root, "manifest.acf", b"manifest");
        let before = tree_snapshot(&source_root);

        // Side files are copied last, so the whole primary tree lands first
        let fs = Arc::new(FaultyFileSystem::new().fail_copy("manifest.acf"));
        let group = MoveGroup::new(&source_root, "common/Game").with_side_file("manifest.acf");
        let result = MoveOperation::with_file_system(fs).run(
            &group,
            &destination_root,
            |_| {},
            &CancellationToken::new(),
        );

        match result {
            MoveResult::Failed(e) => assert!(e.to_string().contains("injected fault")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(tree_snapshot(&source_root), before);
        assert_eq!(
            fs::read(destination_root.join("common/Game/data/level.dat")).unwrap(),
            b"level"
        );
    }

    #[test]
    fn test_rollback_failures_are_reported() {
        let temp_dir = TempDir::new().unwrap();
        let source_root = temp_dir.path().join("library");
        let destination_root = temp_dir.path().join("fast");
        for i in 0..4 {
            write_file(&source_root, &format!("common/Game/data/part_{}.bin", i), &[i; 32]);
        }

        let fs = Arc::new(FaultyFileSystem::new().fail_delete("data"));
        let cancel = CancellationToken::new();
        let group = MoveGroup::new(&source_root, "common/Game");
        let result = MoveOperation::with_file_system(fs).report_interval(Duration::ZERO).run(
            &group,
            &destination_root,
            |info| {
                if info.moved_files >= 1 {
                    cancel.cancel();
                }
            },
            &cancel,
        );

        let info = match result {
            MoveResult::Cancelled(info) => info,
            other => panic!("unexpected result: {:?}", other),
        };
        assert!(info.rollback_errors.iter().any(|e| e.path.ends_with("data")));
        // Files inside the stuck directory were still removed
        assert_eq!(
            fs::read_dir(destination_root.join("common/Game/data")).unwrap().count(),
            0
        );
        assert!(source_root.join("common/Game/data/part_0.bin").exists());
    }

    #[test]
    fn test_racing_cancellation_leaves_only_whole_files() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        for d in 0..12 {
            for f in 0..12 {
                write_file(
                    source.path(),
                    &format!("dir_{}/file_{}.bin", d, f),
                    &vec![(d + f) as u8; 2048],
                );
            }
        }

        for delay in [0u64, 1, 3] {
            let target = destination.path().join(format!("attempt_{}", delay));
            let synchronizer = Synchronizer::builder().workers(4).build().unwrap();
            let handle = synchronizer.synchronize_paths(source.path(), &target).unwrap();
            thread::sleep(Duration::from_millis(delay));
            handle.cancel();
            let stats = handle.join().unwrap();
            info!("Cancelled after {}ms: {} files copied", delay, stats.files_copied);

            assert!(!stats.has_errors());
            // Cancelled before the root was created
            let copied = if target.exists() {
                tree_snapshot(&target)
            } else {
                Default::default()
            };
            let original = tree_snapshot(source.path());
            for (path, contents) in &copied {
                assert_eq!(original.get(path), Some(contents), "{:?} differs from its source", path);
            }
            if !stats.cancelled {
                assert_eq!(copied, original);
            }
        }
    }
}
