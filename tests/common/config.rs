//! Test configuration helpers for creating decompressors in temporary directories

use super::fixtures::TEST_VARIANT;
use nanopack::Config;
use nanopack::config::{PersistenceConfig, RetryConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary application layout: package file, data directory and database
pub struct TestApp {
    /// Root of everything the test writes
    pub root: TempDir,
}

impl TestApp {
    /// Create an empty layout
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    /// Path of the application package
    pub fn package_path(&self) -> PathBuf {
        self.root.path().join("app").join("base.pkg")
    }

    /// Directory for extracted blobs
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.path().join("app").join("lib")
    }

    /// Parent of the per-version working directories
    pub fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    /// Configuration pointing at this layout
    pub fn config(&self) -> Config {
        Config {
            data_dir: self.data_dir(),
            package_path: self.package_path(),
            variant: TEST_VARIANT.to_string(),
            retry: RetryConfig::default(),
            persistence: PersistenceConfig {
                database_path: self.data_dir().join("nano.db"),
            },
            ..Default::default()
        }
    }

    /// Directories under the data directory named like working directories
    pub fn working_dirs(&self) -> Vec<PathBuf> {
        list_working_dirs(&self.data_dir())
    }
}

/// Directories named `nano<digits>` directly under `dir`, sorted
pub fn list_working_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .and_then(|n| n.strip_prefix("nano"))
                        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
                })
                .collect()
        })
        .unwrap_or_default();
    dirs.sort();
    dirs
}
