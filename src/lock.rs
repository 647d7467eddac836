//! Cross-process group locks
//!
//! Expansion of a group must happen at most once at a time across threads
//! *and* processes, so the lock is an OS advisory lock on a `<group>.lock`
//! file rather than an in-process mutex. The OS drops the lock when the
//! holding process dies.

use crate::error::{Error, Result};
use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix appended to a group name to form its lock file name
pub const LOCK_FILE_SUFFIX: &str = ".lock";

/// Path of the lock file guarding `group` inside `work_dir`
pub fn group_lock_path(work_dir: &Path, group: &str) -> PathBuf {
    work_dir.join(format!("{group}{LOCK_FILE_SUFFIX}"))
}

/// An exclusive advisory lock on a lock file
///
/// Released by [`release`](Self::release) or, failing that, on drop. Release
/// never reports an error to the caller; failures are logged.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    file: Option<File>,
}

impl ProcessLock {
    /// Block until the lock on `path` is held
    ///
    /// Creates the lock file and its parent directories if needed. There is no
    /// timeout; use [`try_acquire`](Self::try_acquire) with your own backoff
    /// when waiting indefinitely is not acceptable.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        info!(?path, "blocking on lock");
        file.lock_exclusive().map_err(|source| Error::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        info!(?path, "acquired lock");
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    /// Take the lock on `path` if nobody holds it, without waiting
    ///
    /// Returns `Ok(None)` when another handle (in this or another process)
    /// holds the lock.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(?path, "acquired lock without waiting");
                Ok(Some(Self {
                    path: path.to_path_buf(),
                    file: Some(file),
                }))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            #[cfg(windows)]
            Err(err) if matches!(err.raw_os_error(), Some(32 | 33)) => Ok(None),
            Err(source) => Err(Error::Lock {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and close the file
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(path = ?self.path, error = %e, "failed to release lock");
            } else {
                info!(path = ?self.path, "released lock");
            }
            // Closing the descriptor drops any lock the unlock call left behind
            drop(file);
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| Error::Lock {
            path: path.to_path_buf(),
            source,
        })?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|source| Error::Lock {
            path: path.to_path_buf(),
            source,
        })
}
