//! Per-version working directories and upgrade migration
//!
//! Every package version expands into its own `nano<fingerprint>` directory
//! under the data directory. When the fingerprint changes, files from the
//! previous version's directory that are still byte-identical to what the
//! new manifest expects are moved over instead of being expanded again, and
//! the old directory is deleted.

use crate::error::{Error, Result};
use crate::integrity::check_value;
use crate::lock::LOCK_FILE_SUFFIX;
use crate::preferences::{
    GROUP_FINISHED_PREFIX, PreferenceStore, VERSION_FINGERPRINT_KEY, group_finished_key,
};
use crate::types::{FileDescriptor, Fingerprint, PackageInfo};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug)]
struct VersionState {
    current: Fingerprint,
    previous: Option<Fingerprint>,
}

/// Outcome of [`CacheManager::migrate`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Files moved into the current working directory
    pub moved: Vec<String>,
    /// Files left behind (unknown name or changed content) and deleted with the old directory
    pub discarded: Vec<String>,
    /// Whether the previous working directory was removed
    pub removed_previous: bool,
}

/// Owner of the version fingerprint and working directory
///
/// Must be initialized with [`init`](Self::init) exactly once before any
/// other use; later `init` calls are no-ops.
pub struct CacheManager {
    data_dir: PathBuf,
    prefs: Arc<dyn PreferenceStore>,
    buffer_size: usize,
    state: OnceCell<VersionState>,
    work_dir: OnceLock<PathBuf>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("data_dir", &self.data_dir)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// A manager rooting working directories under `data_dir`
    pub fn new(data_dir: impl AsRef<Path>, prefs: Arc<dyn PreferenceStore>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            prefs,
            buffer_size: crate::config::default_buffer_size(),
            state: OnceCell::new(),
            work_dir: OnceLock::new(),
        }
    }

    /// Chunk size used when checking files during migration
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Compute the current fingerprint and compare it with the recorded one
    ///
    /// On a version change the new fingerprint is persisted and every group
    /// finished flag is cleared.
    pub async fn init(&self, package: &PackageInfo) -> Result<Fingerprint> {
        let state = self
            .state
            .get_or_try_init(|| async {
                let current = package.fingerprint()?;
                let previous = self
                    .prefs
                    .get(VERSION_FINGERPRINT_KEY)
                    .await?
                    .and_then(|v| match v.parse::<Fingerprint>() {
                        Ok(fp) => Some(fp),
                        Err(e) => {
                            warn!(value = %v, error = %e, "ignoring malformed stored fingerprint");
                            None
                        }
                    });

                if previous != Some(current) {
                    self.prefs
                        .set(VERSION_FINGERPRINT_KEY, &current.to_string())
                        .await?;
                    let cleared = self.prefs.remove_prefix(GROUP_FINISHED_PREFIX).await?;
                    info!(
                        current = %current,
                        previous = ?previous.map(|p| p.0),
                        cleared_flags = cleared,
                        "package version changed"
                    );
                } else {
                    debug!(current = %current, "package version unchanged");
                }

                Ok::<_, Error>(VersionState { current, previous })
            })
            .await?;
        Ok(state.current)
    }

    fn state(&self) -> Result<VersionState> {
        self.state.get().copied().ok_or_else(|| {
            Error::config("cache manager used before init", "package_path")
        })
    }

    /// Fingerprint of the running package version
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(self.state()?.current)
    }

    /// Whether the recorded fingerprint differs from the current one
    ///
    /// A first install (nothing recorded) counts as a change.
    pub fn is_upgraded(&self) -> Result<bool> {
        let state = self.state()?;
        Ok(state.previous != Some(state.current))
    }

    /// `<data_dir>/nano<fingerprint>`, created on first call
    pub fn current_working_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = self.work_dir.get() {
            return Ok(dir.clone());
        }
        let dir = self.data_dir.join(self.fingerprint()?.dir_name());
        fs::create_dir_all(&dir)?;
        Ok(self.work_dir.get_or_init(|| dir).clone())
    }

    /// Working directory of the previously recorded version, if it differs
    pub fn previous_working_dir(&self) -> Result<Option<PathBuf>> {
        let state = self.state()?;
        Ok(state
            .previous
            .filter(|p| *p != state.current)
            .map(|p| self.data_dir.join(p.dir_name())))
    }

    /// Move still-valid files from the previous version's directory, then delete it
    ///
    /// `expected` is every descriptor of the current manifest. A file is
    /// moved only when both its name and its check value match. Failures are
    /// logged and never returned; anything not moved is simply expanded again.
    pub async fn migrate(&self, expected: &[FileDescriptor]) -> Result<MigrationReport> {
        let Some(old_dir) = self.previous_working_dir()? else {
            return Ok(MigrationReport::default());
        };
        if !old_dir.is_dir() {
            debug!(?old_dir, "no previous working directory to migrate");
            return Ok(MigrationReport::default());
        }
        let new_dir = self.current_working_dir()?;
        let expected: HashMap<String, FileDescriptor> = expected
            .iter()
            .map(|d| (d.name.clone(), d.clone()))
            .collect();
        let buffer_size = self.buffer_size;

        let report = tokio::task::spawn_blocking(move || {
            migrate_dir(&old_dir, &new_dir, &expected, buffer_size)
        })
        .await
        .map_err(|e| Error::Other(format!("migration task failed: {e}")))?;

        info!(
            moved = report.moved.len(),
            discarded = report.discarded.len(),
            removed_previous = report.removed_previous,
            "migration finished"
        );
        Ok(report)
    }

    /// Persist whether `group` finished expanding
    pub async fn mark_group_finished(&self, group: &str, finished: bool) -> Result<()> {
        self.prefs
            .set(&group_finished_key(group), if finished { "true" } else { "false" })
            .await
    }

    /// Whether `group` was last marked finished
    ///
    /// A hint only: files may have been modified since.
    pub async fn is_group_finished(&self, group: &str) -> Result<bool> {
        Ok(self
            .prefs
            .get(&group_finished_key(group))
            .await?
            .is_some_and(|v| v == "true"))
    }
}

fn migrate_dir(
    old_dir: &Path,
    new_dir: &Path,
    expected: &HashMap<String, FileDescriptor>,
    buffer_size: usize,
) -> MigrationReport {
    let mut report = MigrationReport::default();

    match fs::read_dir(old_dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                if !path.is_file() || name.ends_with(LOCK_FILE_SUFFIX) {
                    continue;
                }

                let matches = expected
                    .get(&name)
                    .is_some_and(|d| check_value(&path, buffer_size) == d.check_value);
                if !matches {
                    debug!(file = %name, "not migrating changed or unknown file");
                    report.discarded.push(name);
                    continue;
                }

                match fs::rename(&path, new_dir.join(&name)) {
                    Ok(()) => {
                        debug!(file = %name, "migrated file");
                        report.moved.push(name);
                    }
                    Err(e) => {
                        warn!(file = %name, error = %e, "failed to migrate file");
                        report.discarded.push(name);
                    }
                }
            }
        }
        Err(e) => warn!(?old_dir, error = %e, "failed to list previous working directory"),
    }

    match fs::remove_dir_all(old_dir) {
        Ok(()) => report.removed_previous = true,
        Err(e) => warn!(?old_dir, error = %e, "failed to remove previous working directory"),
    }
    report
}
