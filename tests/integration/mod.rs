//! Integration tests for treesync
//!
//! Full mirror and move scenarios on real temporary directories, checked
//! through both the returned statistics and the resulting trees.

use super::tree_snapshot;
use ::treesync::*;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;

/// Source and destination directories for one scenario
pub struct SyncTestHarness {
    pub source: TempDir,
    pub destination: TempDir,
}

impl SyncTestHarness {
    pub fn new() -> Self {
        Self {
            source: TempDir::new().unwrap(),
            destination: TempDir::new().unwrap(),
        }
    }

    pub fn source(&self) -> &Path {
        self.source.path()
    }

    pub fn destination(&self) -> &Path {
        self.destination.path()
    }

    /// Write a source file, creating its parents
    pub fn write_source(&self, relative: &str, contents: &[u8]) {
        write_file(self.source(), relative, contents);
    }

    /// Write a destination file, creating its parents
    pub fn write_destination(&self, relative: &str, contents: &[u8]) {
        write_file(self.destination(), relative, contents);
    }

    /// Run one synchronization to completion
    pub fn sync(&self, options: CopyOptions) -> StatisticsSnapshot {
        Synchronizer::builder()
            .workers(4)
            .options(options)
            .build()
            .unwrap()
            .synchronize_paths(self.source(), self.destination())
            .unwrap()
            .join()
            .unwrap()
    }

    /// Generate `dirs` directories of `files` files, plus `files` at the top
    pub fn generate(&self, dirs: usize, files: usize) {
        for f in 0..files {
            self.write_source(&format!("top_{}.txt", f), format!("top {}", f).as_bytes());
        }
        for d in 0..dirs {
            for f in 0..files {
                self.write_source(
                    &format!("dir_{}/sub_{}/file_{}.dat", d, d % 2, f),
                    &vec![(d * files + f) as u8; 64 + f],
                );
            }
        }
    }
}

impl Default for SyncTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn write_file(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_flat_copy_into_existing_destination() {
        let harness = SyncTestHarness::new();
        harness.write_source("a.bin", &[1; 10]);
        harness.write_source("b.bin", &[2; 11]);
        harness.write_source("c.bin", &[3; 12]);

        let stats = harness.sync(CopyOptions::new());

        assert_eq!(stats.files_copied, 3);
        assert_eq!(stats.bytes_copied, 33);
        assert_eq!(stats.directories_created, 0);
        assert!(!stats.has_errors());
        assert_eq!(tree_snapshot(harness.source()), tree_snapshot(harness.destination()));
    }

    #[test]
    #[traced_test]
    fn test_two_subdirectories() {
        let harness = SyncTestHarness::new();
        for name in ["a/1.txt", "a/2.txt", "a/3.txt", "b/1.txt", "b/2.txt"] {
            harness.write_source(name, name.as_bytes());
        }

        let stats = harness.sync(CopyOptions::new());

        assert_eq!(stats.directories_created, 2);
        assert_eq!(stats.files_copied, 5);
        assert_eq!(stats.directories_traversed, 3);
        assert_eq!(tree_snapshot(harness.source()), tree_snapshot(harness.destination()));
    }

    #[test]
    #[traced_test]
    fn test_mismatched_file_replaced_by_directory() {
        let harness = SyncTestHarness::new();
        for name in ["a/1.txt", "a/2.txt", "a/3.txt", "b/1.txt", "b/2.txt"] {
            harness.write_source(name, name.as_bytes());
        }
        harness.write_destination("a", &[0; 10]);

        let stats = harness.sync(CopyOptions::new().delete_mismatched_files(true));

        assert_eq!(stats.files_deleted, 1);
        assert_eq!(stats.directories_created, 2);
        assert_eq!(stats.files_copied, 5);
        assert!(!stats.has_errors());
        assert!(harness.destination().join("a").is_dir());
    }

    #[test]
    fn test_mismatch_without_delete_policy_is_recorded() {
        let harness = SyncTestHarness::new();
        harness.write_source("a/inner.txt", b"inner");
        harness.write_source("keep.txt", b"keep");
        harness.write_destination("a", b"file in the way");

        let stats = harness.sync(CopyOptions::new());

        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].path, harness.destination().join("a"));
        assert_eq!(stats.files_copied, 1);
        assert_eq!(fs::read(harness.destination().join("a")).unwrap(), b"file in the way");
    }

    #[test]
    fn test_mismatched_policy_keeps_extra_entries() {
        let harness = SyncTestHarness::new();
        harness.write_source("same.txt", b"source");
        harness.write_destination("extra.txt", b"extra");
        harness.write_destination("old/nested.txt", b"old");

        let stats = harness.sync(CopyOptions::new().delete_mismatched_files(true));

        assert_eq!(stats.entries_deleted(), 0);
        assert!(harness.destination().join("extra.txt").exists());
        assert!(harness.destination().join("old/nested.txt").exists());
    }

    #[test]
    #[traced_test]
    fn test_mirror_deletes_extra_entries_recursively() {
        let harness = SyncTestHarness::new();
        harness.write_source("kept.txt", b"kept");
        harness.write_destination("stale.txt", b"stale");
        harness.write_destination("stale_dir/a.txt", b"a");
        harness.write_destination("stale_dir/deep/b.txt", b"b");

        let stats = harness.sync(CopyOptions::mirror());

        assert_eq!(stats.files_deleted, 3);
        assert_eq!(stats.directories_deleted, 2);
        assert_eq!(stats.files_copied, 1);
        assert_eq!(tree_snapshot(harness.source()), tree_snapshot(harness.destination()));
    }

    #[test]
    #[traced_test]
    fn test_second_mirror_changes_nothing() {
        let harness = SyncTestHarness::new();
        harness.generate(4, 5);

        let first = harness.sync(CopyOptions::mirror());
        assert_eq!(first.files_copied, 25);
        assert!(first.is_complete());

        let second = harness.sync(CopyOptions::mirror());
        info!("Second run: {:?}", second);
        assert_eq!(second.files_copied, 0);
        assert_eq!(second.files_skipped, 25);
        assert_eq!(second.bytes_skipped, first.bytes_copied);
        assert_eq!(second.entries_deleted(), 0);
        assert_eq!(second.directories_created, 0);
        assert!(second.is_complete());
        assert_eq!(tree_snapshot(harness.source()), tree_snapshot(harness.destination()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_case_distinct_siblings_keep_their_own_contents() {
        let harness = SyncTestHarness::new();
        harness.write_source("A.txt", b"upper case contents");
        harness.write_source("a.txt", b"lower");

        let first = harness.sync(CopyOptions::mirror());
        assert_eq!(first.files_copied, 2);

        let second = harness.sync(CopyOptions::mirror());
        assert_eq!(second.files_copied, 0);
        assert_eq!(second.files_skipped, 2);
        assert_eq!(second.entries_deleted(), 0);
        assert_eq!(fs::read(harness.destination().join("a.txt")).unwrap(), b"lower");

        harness.write_source("A.txt", b"upper case, edited");
        let third = harness.sync(CopyOptions::mirror());
        assert_eq!(third.files_copied, 1);
        assert_eq!(fs::read(harness.destination().join("A.txt")).unwrap(), b"upper case, edited");
        assert_eq!(fs::read(harness.destination().join("a.txt")).unwrap(), b"lower");
        assert_eq!(tree_snapshot(harness.source()), tree_snapshot(harness.destination()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_ambiguous_destination_names_are_not_reused() {
        let harness = SyncTestHarness::new();
        harness.write_source("Notes.md", b"fresh");
        harness.write_destination("notes.md", b"one");
        harness.write_destination("NOTES.md", b"two");

        let stats = harness.sync(CopyOptions::mirror());

        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.files_deleted, 2);
        assert_eq!(tree_snapshot(harness.source()), tree_snapshot(harness.destination()));
    }

    #[test]
    fn test_changed_file_is_recopied() {
        let harness = SyncTestHarness::new();
        harness.write_source("doc.txt", b"version one");
        harness.sync(CopyOptions::mirror());

        harness.write_source("doc.txt", b"version two, longer");
        let stats = harness.sync(CopyOptions::mirror());

        assert_eq!(stats.files_copied, 1);
        assert_eq!(
            fs::read(harness.destination().join("doc.txt")).unwrap(),
            b"version two, longer"
        );
    }

    #[test]
    fn test_changed_read_only_file_is_recopied() {
        let harness = SyncTestHarness::new();
        let source = harness.source().join("settings.ini");
        #[allow(clippy::permissions_set_readonly_false)]
        let set_readonly = |readonly: bool| {
            let mut permissions = fs::metadata(&source).unwrap().permissions();
            permissions.set_readonly(readonly);
            fs::set_permissions(&source, permissions).unwrap();
        };
        harness.write_source("settings.ini", b"mode=fast");
        set_readonly(true);
        harness.sync(CopyOptions::mirror());

        set_readonly(false);
        harness.write_source("settings.ini", b"mode=careful");
        set_readonly(true);
        let stats = harness.sync(CopyOptions::mirror());

        assert!(!stats.has_errors(), "errors: {:?}", stats.errors);
        assert_eq!(stats.files_copied, 1);
        assert_eq!(
            fs::read(harness.destination().join("settings.ini")).unwrap(),
            b"mode=careful"
        );
    }

    #[test]
    fn test_skip_identical_compares_metadata_only() {
        let harness = SyncTestHarness::new();
        harness.write_source("same_stamp.txt", b"source!");
        harness.write_source("new_stamp.txt", b"source!");
        harness.write_destination("same_stamp.txt", b"stale!!");
        harness.write_destination("new_stamp.txt", b"stale!!");

        let stamp = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        for name in ["same_stamp.txt", "new_stamp.txt"] {
            filetime::set_file_mtime(harness.source().join(name), stamp).unwrap();
        }
        filetime::set_file_mtime(harness.destination().join("same_stamp.txt"), stamp).unwrap();

        let stats = harness.sync(CopyOptions::new().skip_identical_files(true));

        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files_copied, 1);
        // Same size and write time: left alone even though the bytes differ
        assert_eq!(fs::read(harness.destination().join("same_stamp.txt")).unwrap(), b"stale!!");
        assert_eq!(fs::read(harness.destination().join("new_stamp.txt")).unwrap(), b"source!");
    }

    #[test]
    fn test_excluded_entries_are_neither_copied_nor_deleted() {
        let harness = SyncTestHarness::new();
        harness.write_source("keep.txt", b"keep");
        harness.write_source("build/output.o", b"object");
        harness.write_destination("notes.swp", b"editor state");

        let stats = harness.sync(CopyOptions::mirror().exclude(["build", "*.swp"]));

        assert_eq!(stats.files_enumerated, 1);
        assert_eq!(stats.entries_deleted(), 0);
        assert!(!harness.destination().join("build").exists());
        assert!(harness.destination().join("notes.swp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symbolic_links_are_reproduced() {
        let harness = SyncTestHarness::new();
        harness.write_source("real.txt", b"real");
        std::os::unix::fs::symlink("real.txt", harness.source().join("alias")).unwrap();

        let stats = harness.sync(CopyOptions::mirror());
        assert_eq!(stats.links_enumerated, 1);
        assert_eq!(stats.links_copied, 1);
        assert_eq!(stats.files_copied, 1);
        assert_eq!(
            fs::read_link(harness.destination().join("alias")).unwrap(),
            Path::new("real.txt")
        );

        let again = harness.sync(CopyOptions::mirror());
        assert_eq!(again.links_skipped, 1);
        assert_eq!(again.links_copied, 0);
    }

    #[test]
    fn test_pulse_sees_monotonic_progress() {
        let harness = SyncTestHarness::new();
        harness.generate(6, 8);

        let synchronizer = Synchronizer::builder().workers(2).build().unwrap();
        let handle = synchronizer
            .synchronize_paths(harness.source(), harness.destination())
            .unwrap();

        let mut seen = Vec::new();
        let mut throttle = Throttle::new(Duration::from_millis(1));
        handle.wait_with_pulse(Duration::from_millis(1), &mut throttle, |stats| {
            seen.push(stats.files_copied)
        });
        let stats = handle.join().unwrap();

        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        // The final pulse always reflects the finished run
        assert_eq!(*seen.last().unwrap(), stats.files_copied);
    }

    #[test]
    fn test_deleted_events_reported() {
        let harness = SyncTestHarness::new();
        harness.write_destination("gone/file.txt", b"x");

        let synchronizer = Synchronizer::new(CopyOptions::mirror()).unwrap();
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&deleted);
        synchronizer.events().subscribe(move |event| {
            if let SyncEvent::EntryDeleted { path, directory } = event {
                sink.lock().push((path.clone(), *directory));
            }
        });

        synchronizer
            .synchronize_paths(harness.source(), harness.destination())
            .unwrap()
            .join()
            .unwrap();

        let deleted = deleted.lock();
        assert_eq!(
            *deleted,
            vec![
                (harness.destination().join("gone/file.txt"), false),
                (harness.destination().join("gone"), true),
            ]
        );
    }

    #[test]
    #[traced_test]
    fn test_move_with_secondary_and_side_files() {
        let temp_dir = TempDir::new().unwrap();
        let source_root = temp_dir.path().join("library");
        let destination_root = temp_dir.path().join("fast");
        write_file(&source_root, "common/Game/bin/game", &[7; 300]);
        write_file(&source_root, "common/Game/readme.txt", b"readme");
        write_file(&source_root, "workshop/content/42/mod.pak", &[1; 50]);
        write_file(&source_root, "appmanifest_42.acf", b"manifest");
        write_file(&source_root, "workshop/appworkshop_42.acf", b"workshop");

        let group = MoveGroup::new(&source_root, "common/Game")
            .with_secondary("workshop/content/42")
            .with_side_file("appmanifest_42.acf")
            .with_side_file("workshop/appworkshop_42.acf");
        let before = tree_snapshot(&source_root.join("common/Game"));

        let result = MoveOperation::new().run(&group, &destination_root, |_| {}, &CancellationToken::new());
        let info = match result {
            MoveResult::Completed(info) => info,
            other => panic!("unexpected result: {:?}", other),
        };

        assert_eq!(info.total_files, 5);
        assert_eq!(info.moved_files, 5);
        assert_eq!(info.total_bytes, info.moved_bytes);
        assert_eq!(info.moved_bytes, 300 + 6 + 50 + 8 + 8);
        assert_eq!(tree_snapshot(&destination_root.join("common/Game")), before);
        assert!(destination_root.join("workshop/content/42/mod.pak").is_file());
        assert!(destination_root.join("workshop/appworkshop_42.acf").is_file());
        assert!(!source_root.join("common/Game").exists());
        assert!(!source_root.join("workshop/content/42").exists());
        assert!(!source_root.join("appmanifest_42.acf").exists());
    }

    #[test]
    fn test_move_into_non_empty_destination_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let source_root = temp_dir.path().join("library");
        let destination_root = temp_dir.path().join("fast");
        write_file(&source_root, "common/Game/game.exe", b"binary");
        write_file(&destination_root, "common/Game/leftover.txt", b"leftover");

        let group = MoveGroup::new(&source_root, "common/Game");
        let mut reports = Vec::new();
        let result = MoveOperation::new().run(
            &group,
            &destination_root,
            |info| reports.push(info.moved_bytes),
            &CancellationToken::new(),
        );

        assert!(matches!(result, MoveResult::Failed(SyncError::Validation(_))));
        assert!(reports.is_empty());
        assert!(source_root.join("common/Game/game.exe").exists());
        assert!(!destination_root.join("common/Game/game.exe").exists());
        assert!(destination_root.join("common/Game/leftover.txt").exists());
    }

    #[test]
    fn test_move_into_existing_empty_destination() {
        let temp_dir = TempDir::new().unwrap();
        let source_root = temp_dir.path().join("library");
        let destination_root = temp_dir.path().join("fast");
        write_file(&source_root, "common/Game/game.exe", b"binary");
        fs::create_dir_all(destination_root.join("common/Game")).unwrap();

        let group = MoveGroup::new(&source_root, "common/Game");
        let result = MoveOperation::new().run(&group, &destination_root, |_| {}, &CancellationToken::new());

        assert!(result.is_completed());
        assert_eq!(fs::read(destination_root.join("common/Game/game.exe")).unwrap(), b"binary");
    }

    #[test]
    fn test_move_rejects_missing_side_file_and_existing_destination_side_file() {
        let temp_dir = TempDir::new().unwrap();
        let source_root = temp_dir.path().join("library");
        let destination_root = temp_dir.path().join("fast");
        write_file(&source_root, "common/Game/game.exe", b"binary");
        write_file(&source_root, "manifest.acf", b"manifest");

        let operation = MoveOperation::new();
        let missing = MoveGroup::new(&source_root, "common/Game").with_side_file("absent.acf");
        assert!(matches!(
            operation.validate(&missing, &destination_root),
            Err(SyncError::Validation(_))
        ));

        write_file(&destination_root, "manifest.acf", b"other");
        let taken = MoveGroup::new(&source_root, "common/Game").with_side_file("manifest.acf");
        assert!(matches!(
            operation.validate(&taken, &destination_root),
            Err(SyncError::Validation(_))
        ));
        assert!(!destination_root.join("common").exists());
    }

    #[test]
    #[traced_test]
    fn test_cancelled_move_rolls_back_destination() {
        let temp_dir = TempDir::new().unwrap();
        let source_root = temp_dir.path().join("library");
        let destination_root = temp_dir.path().join("fast");
        for i in 0..10 {
            write_file(&source_root, &format!("common/Game/data/chunk_{}.bin", i), &[i as u8; 128]);
        }
        write_file(&source_root, "manifest.acf", b"manifest");
        let before = tree_snapshot(&source_root);

        let group = MoveGroup::new(&source_root, "common/Game").with_side_file("manifest.acf");
        let cancel = CancellationToken::new();
        let mut phases = Vec::new();
        let result = MoveOperation::new().report_interval(Duration::ZERO).run(
            &group,
            &destination_root,
            |info| {
                if phases.last() != Some(&info.phase) {
                    phases.push(info.phase);
                }
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
        assert!(info.rollback_errors.is_empty());
        assert!(info.deleted_files >= 1);
        assert_eq!(
            phases,
            vec![
                MovePhase::DiscoveringSourceFiles,
                MovePhase::CopyingFiles,
                MovePhase::DeletingDestinationAfterCancellation
            ]
        );
        // Everything the move created is gone, the source is untouched
        assert!(!destination_root.exists());
        assert_eq!(tree_snapshot(&source_root), before);
    }

    #[test]
    fn test_cancelled_before_start_moves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let source_root = temp_dir.path().join("library");
        let destination_root = temp_dir.path().join("fast");
        write_file(&source_root, "common/Game/game.exe", b"binary");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let group = MoveGroup::new(&source_root, "common/Game");
        let result = MoveOperation::new().run(&group, &destination_root, |_| {}, &cancel);

        assert!(result.is_cancelled());
        assert!(!destination_root.exists());
        assert!(source_root.join("common/Game/game.exe").exists());
    }

    #[test]
    fn test_cancellation_ignored_while_deleting_source() {
        let temp_dir = TempDir::new().unwrap();
        let source_root = temp_dir.path().join("library");
        let destination_root = temp_dir.path().join("fast");
        write_file(&source_root, "common/Game/a.bin", b"a");
        write_file(&source_root, "common/Game/b.bin", b"b");

        let cancel = CancellationToken::new();
        let group = MoveGroup::new(&source_root, "common/Game");
        let result = MoveOperation::new().run(
            &group,
            &destination_root,
            |info| {
                if info.phase == MovePhase::DeletingSourceDirectory {
                    cancel.cancel();
                }
            },
            &cancel,
        );

        assert!(result.is_completed());
        assert!(!source_root.join("common/Game").exists());
        assert!(destination_root.join("common/Game/b.bin").exists());
    }
}
