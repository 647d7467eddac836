//! One blob's worth of decompression work

use crate::config::RetryConfig;
use crate::error::{Result, StreamError};
use crate::method::DecompressMethod;
use crate::retry::run_with_retry;
use crate::source::BlobSource;
use crate::types::FileDescriptor;
use crate::writer::MultiFileWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Decompresses one blob and splits it into its files
///
/// Every attempt opens a fresh stream from the [`BlobSource`] and rewrites
/// every file of the unit from scratch. Any failure is retried until the
/// [`RetryConfig`] is exhausted.
pub struct DecompressionTask {
    blob: String,
    descriptors: Vec<FileDescriptor>,
    out_dir: PathBuf,
    method: Arc<dyn DecompressMethod>,
    source: Arc<dyn BlobSource>,
    retry: RetryConfig,
    buffer_size: usize,
}

impl std::fmt::Debug for DecompressionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecompressionTask")
            .field("blob", &self.blob)
            .field("files", &self.descriptors.len())
            .field("out_dir", &self.out_dir)
            .field("method", &self.method.name())
            .finish_non_exhaustive()
    }
}

impl DecompressionTask {
    /// Build the task for `blob`, writing `descriptors` into `out_dir`
    pub fn new(
        blob: impl Into<String>,
        descriptors: Vec<FileDescriptor>,
        out_dir: &Path,
        method: Arc<dyn DecompressMethod>,
        source: Arc<dyn BlobSource>,
    ) -> Self {
        Self {
            blob: blob.into(),
            descriptors,
            out_dir: out_dir.to_path_buf(),
            method,
            source,
            retry: RetryConfig::default(),
            buffer_size: crate::config::default_buffer_size(),
        }
    }

    /// Use `retry` instead of the default retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Use `buffer_size` byte chunks when reading the stream
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Name of the blob this task expands
    pub fn blob(&self) -> &str {
        &self.blob
    }

    /// Files this task writes
    pub fn descriptors(&self) -> &[FileDescriptor] {
        &self.descriptors
    }

    /// Expand the blob, retrying on failure
    ///
    /// Blocks the calling thread on stream I/O and between retries.
    pub fn run(&self) -> Result<()> {
        let start = Instant::now();
        run_with_retry(&self.retry, &self.blob, |attempt| {
            debug!(blob = %self.blob, attempt, "decompressing blob");
            self.attempt()
        })?;
        info!(
            blob = %self.blob,
            files = self.descriptors.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "blob expanded"
        );
        Ok(())
    }

    fn attempt(&self) -> Result<()> {
        let raw = self.source.open(&self.blob)?;
        let mut stream =
            self.method
                .decompressed_stream(raw)
                .map_err(|e| StreamError::Decoder {
                    blob: self.blob.clone(),
                    reason: e.to_string(),
                })?;

        let mut writer =
            MultiFileWriter::create(&self.out_dir, &self.descriptors, self.buffer_size)?;
        let result = writer.write_from(&mut stream);
        writer.close();
        result.map(|_| ())
    }
}
