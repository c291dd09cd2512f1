//! Main test module for treesync
//!
//! This module includes all test suites:
//! - Integration tests for complete mirror and move scenarios
//! - Chaos tests with injected filesystem faults and racing cancellation
//! - Property-based tests for tree invariants

pub mod chaos;
pub mod integration;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Relative path to file contents (`None` for directories) of everything under `root`
pub fn tree_snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let contents = if entry.file_type().is_file() {
                Some(std::fs::read(entry.path()).unwrap())
            } else {
                None
            };
            (relative, contents)
        })
        .collect()
}

#[cfg(test)]
mod edge_cases {
    use super::tree_snapshot;
    use ::treesync::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_source_directory() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();

        let stats = Synchronizer::builder()
            .workers(1)
            .build()
            .unwrap()
            .synchronize_paths(source.path(), destination.path())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(stats.files_enumerated, 0);
        assert_eq!(stats.directories_created, 0);
        assert_eq!(stats.directories_traversed, 1);
        assert!(!stats.has_errors());
    }

    #[test]
    fn test_missing_destination_root_is_created() {
        let source = TempDir::new().unwrap();
        let parent = TempDir::new().unwrap();
        fs::write(source.path().join("only.txt"), "x").unwrap();
        let destination = parent.path().join("new/root");

        let stats = Synchronizer::builder()
            .workers(1)
            .build()
            .unwrap()
            .synchronize_paths(source.path(), &destination)
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.directories_created, 1);
        assert_eq!(fs::read(destination.join("only.txt")).unwrap(), b"x");
    }

    #[test]
    fn test_empty_files_and_empty_directories() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("empty/nested")).unwrap();
        fs::write(source.path().join("zero.bin"), b"").unwrap();

        let stats = Synchronizer::builder()
            .workers(2)
            .build()
            .unwrap()
            .synchronize_paths(source.path(), destination.path())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.bytes_copied, 0);
        assert_eq!(stats.directories_created, 2);
        assert_eq!(tree_snapshot(source.path()), tree_snapshot(destination.path()));
    }

    #[test]
    fn test_destination_file_where_root_should_be() {
        let source = TempDir::new().unwrap();
        let parent = TempDir::new().unwrap();
        let destination = parent.path().join("occupied");
        fs::write(&destination, "not a directory").unwrap();

        let stats = Synchronizer::builder()
            .workers(1)
            .build()
            .unwrap()
            .synchronize_paths(source.path(), &destination)
            .unwrap()
            .join()
            .unwrap();

        // The root could not be prepared, so nothing below it ran
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].path, destination);
        assert_eq!(stats.directories_enumerated, 0);
        assert_eq!(fs::read(&destination).unwrap(), b"not a directory");
    }

    #[test]
    fn test_unicode_names() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("каталог")).unwrap();
        fs::write(source.path().join("каталог/файл.txt"), "данные").unwrap();
        fs::write(source.path().join("画像.png"), [0x89, 0x50]).unwrap();

        let stats = Synchronizer::builder()
            .workers(2)
            .build()
            .unwrap()
            .synchronize_paths(source.path(), destination.path())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(stats.files_copied, 2);
        assert_eq!(tree_snapshot(source.path()), tree_snapshot(destination.path()));
    }

    #[test]
    fn test_case_insensitive_match_reuses_destination_name() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        fs::write(source.path().join("Readme.TXT"), "new contents").unwrap();
        fs::write(destination.path().join("readme.txt"), "old").unwrap();

        let stats = Synchronizer::builder()
            .workers(1)
            .options(CopyOptions::mirror())
            .build()
            .unwrap()
            .synchronize_paths(source.path(), destination.path())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.files_deleted, 0);
        assert_eq!(fs::read(destination.path().join("readme.txt")).unwrap(), b"new contents");
    }
}
