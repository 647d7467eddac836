//! Per-group decompression: lock, verify, expand, re-verify.

use super::Nano;
use crate::error::{Error, Result};
use crate::integrity::filter_needing_expansion;
use crate::lock::{ProcessLock, group_lock_path};
use crate::task::DecompressionTask;
use crate::types::{DecompressReport, Event, FileDescriptor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

impl Nano {
    /// Make every file of `group` present and verified in the working directory
    ///
    /// Blocks (asynchronously) on the group's lock file while another thread
    /// or process expands the same group. Files already matching their check
    /// value are left alone; only blobs holding a missing or stale file are
    /// decompressed. The lock is released on every path out of this call.
    pub async fn decompress(&self, group: &str) -> Result<DecompressReport> {
        let start = Instant::now();
        let result = self.decompress_group(group, start).await;
        match &result {
            Ok(report) => info!(
                group,
                expanded = report.expanded.len(),
                blobs = report.blobs.len(),
                duration_ms = report.duration.as_millis() as u64,
                "group ready"
            ),
            Err(e) => {
                error!(group, error = %e, "decompression failed");
                self.emit_event(Event::Failed {
                    group: group.to_string(),
                    error: e.to_string(),
                });
            }
        }
        result
    }

    /// Files of `group` that are currently missing or stale
    ///
    /// Takes no lock, so the answer may be outdated by the time it returns if
    /// another process is expanding the group.
    pub async fn verify(&self, group: &str) -> Result<Vec<FileDescriptor>> {
        let descriptors = self.group_descriptors(group)?;
        let work_dir = self.cache.current_working_dir()?;
        self.check(work_dir, descriptors).await
    }

    fn group_descriptors(&self, group: &str) -> Result<Vec<FileDescriptor>> {
        self.manifest
            .group(group)
            .map(<[FileDescriptor]>::to_vec)
            .ok_or_else(|| Error::UnknownGroup {
                group: group.to_string(),
                known: self.manifest.group_names(),
            })
    }

    async fn decompress_group(&self, group: &str, start: Instant) -> Result<DecompressReport> {
        let descriptors = self.group_descriptors(group)?;
        let work_dir = self.cache.current_working_dir()?;

        let lock_path = group_lock_path(&work_dir, group);
        let lock = tokio::task::spawn_blocking(move || ProcessLock::acquire(&lock_path))
            .await
            .map_err(|e| Error::Other(format!("lock task failed: {e}")))??;
        self.emit_event(Event::LockAcquired {
            group: group.to_string(),
        });

        // Shared with the workers so an abandoned call cannot unlock while they still write
        let lock = Arc::new(lock);
        let result = self
            .expand_locked(group, &work_dir, descriptors, &lock, start)
            .await;
        if let Ok(lock) = Arc::try_unwrap(lock) {
            lock.release();
        }
        result
    }

    async fn expand_locked(
        &self,
        group: &str,
        work_dir: &Path,
        descriptors: Vec<FileDescriptor>,
        lock: &Arc<ProcessLock>,
        start: Instant,
    ) -> Result<DecompressReport> {
        self.emit_event(Event::Verifying {
            group: group.to_string(),
        });
        let needing = self.check(work_dir.to_path_buf(), descriptors.clone()).await?;

        if needing.is_empty() {
            debug!(group, files = descriptors.len(), "all files verified");
            self.cache.mark_group_finished(group, true).await?;
            self.emit_event(Event::Done {
                group: group.to_string(),
                expanded: Vec::new(),
            });
            return Ok(DecompressReport {
                group: group.to_string(),
                expanded: Vec::new(),
                blobs: Vec::new(),
                duration: start.elapsed(),
            });
        }

        let method = self.methods.resolve(self.manifest.compress_method())?;
        self.cache.mark_group_finished(group, false).await?;

        let expanded: Vec<String> = needing.iter().map(|d| d.name.clone()).collect();
        let mut by_blob: BTreeMap<String, Vec<FileDescriptor>> = BTreeMap::new();
        for d in needing {
            by_blob
                .entry(d.compressed_blob_name.clone())
                .or_default()
                .push(d);
        }
        let blobs: Vec<String> = by_blob.keys().cloned().collect();

        info!(group, files = ?expanded, blobs = ?blobs, "expanding");
        self.emit_event(Event::Expanding {
            group: group.to_string(),
            blobs: blobs.clone(),
        });

        let jobs = by_blob.into_iter().map(|(blob, files)| {
            let task = DecompressionTask::new(
                blob,
                files,
                work_dir,
                method.clone(),
                self.source.clone(),
            )
            .with_retry(self.config.retry.clone())
            .with_buffer_size(self.config.io.buffer_size);
            self.run_task(group, task, lock.clone())
        });

        // Every task runs to completion; the first failure wins
        let mut first_error = None;
        for result in futures::future::join_all(jobs).await {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.emit_event(Event::Reverifying {
            group: group.to_string(),
        });
        let still_invalid = self.check(work_dir.to_path_buf(), descriptors).await?;
        if !still_invalid.is_empty() {
            return Err(Error::Integrity {
                group: group.to_string(),
                files: still_invalid.into_iter().map(|d| d.name).collect(),
            });
        }

        self.cache.mark_group_finished(group, true).await?;
        self.emit_event(Event::Done {
            group: group.to_string(),
            expanded: expanded.clone(),
        });
        Ok(DecompressReport {
            group: group.to_string(),
            expanded,
            blobs,
            duration: start.elapsed(),
        })
    }

    async fn run_task(
        &self,
        group: &str,
        task: DecompressionTask,
        lock: Arc<ProcessLock>,
    ) -> Result<()> {
        let _permit = self
            .worker_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("worker pool closed: {e}")))?;

        let blob = task.blob().to_string();
        tokio::task::spawn_blocking(move || {
            let _lock = lock;
            task.run()
        })
        .await
        .map_err(|e| Error::Other(format!("decompression worker failed: {e}")))??;

        self.emit_event(Event::BlobExpanded {
            group: group.to_string(),
            blob,
        });
        Ok(())
    }

    async fn check(
        &self,
        work_dir: PathBuf,
        descriptors: Vec<FileDescriptor>,
    ) -> Result<Vec<FileDescriptor>> {
        let buffer_size = self.config.io.buffer_size;
        tokio::task::spawn_blocking(move || {
            filter_needing_expansion(&work_dir, &descriptors, buffer_size)
        })
        .await
        .map_err(|e| Error::Other(format!("verification task failed: {e}")))
    }
}
