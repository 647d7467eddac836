//! Top-level decompression entry point
//!
//! The [`Nano`] struct ties the pieces together:
//! - [`run`]: the per-group algorithm (lock, verify, expand, re-verify)
//!
//! Construction initializes the [`CacheManager`] from the configured package
//! and migrates files from the previous version when the package changed.

mod run;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::manifest::{CompressManifest, GroupManifest};
use crate::method::MethodRegistry;
use crate::preferences::PreferenceStore;
use crate::source::BlobSource;
use crate::types::{DecompressReport, Event, PackageInfo};
use std::path::PathBuf;
use std::sync::Arc;

/// Lazy native library decompressor (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Nano {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Validated descriptors of the configured variant
    pub(crate) manifest: Arc<GroupManifest>,
    /// Version fingerprint, working directory and persisted flags
    pub(crate) cache: Arc<CacheManager>,
    /// Where raw blobs are read from
    pub(crate) source: Arc<dyn BlobSource>,
    /// Decompression methods available to this deployment
    pub(crate) methods: Arc<MethodRegistry>,
    /// Bounds how many blobs expand at once across every group
    pub(crate) worker_limit: Arc<tokio::sync::Semaphore>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl std::fmt::Debug for Nano {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nano")
            .field("cache", &self.cache)
            .field("groups", &self.manifest.group_names())
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

impl Nano {
    /// Create a decompressor persisting its state in the configured SQLite database
    ///
    /// This initializes all core components:
    /// - Validates the configuration and selects the manifest variant
    /// - Opens/creates the SQLite database and runs migrations
    /// - Computes the package fingerprint and migrates files after an upgrade
    pub async fn new(
        config: Config,
        manifest: &CompressManifest,
        blobs: Arc<dyn BlobSource>,
    ) -> Result<Self> {
        config.validate()?;
        let db = Database::new(&config.persistence.database_path).await?;
        Self::with_parts(
            config,
            manifest,
            blobs,
            Arc::new(db),
            MethodRegistry::with_defaults(),
        )
        .await
    }

    /// Create a decompressor with an explicit preference store and method registry
    pub async fn with_parts(
        config: Config,
        manifest: &CompressManifest,
        blobs: Arc<dyn BlobSource>,
        prefs: Arc<dyn PreferenceStore>,
        methods: MethodRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let manifest = manifest.group_manifest(&config.variant)?;

        let cache = CacheManager::new(&config.data_dir, prefs)
            .with_buffer_size(config.io.buffer_size);
        let fingerprint = cache.init(&PackageInfo::new(&config.package_path)).await?;

        if cache.is_upgraded()? {
            let expected: Vec<_> = manifest.all_descriptors().cloned().collect();
            // Migration only saves work; anything it misses is expanded later
            if let Err(e) = cache.migrate(&expected).await {
                tracing::warn!(error = %e, "migration from previous version failed");
            }
        }

        // Create broadcast channel with buffer size of 256 events
        let (event_tx, _rx) = tokio::sync::broadcast::channel(256);

        tracing::info!(
            fingerprint = %fingerprint,
            variant = %config.variant,
            groups = ?manifest.group_names(),
            max_workers = config.workers.max_workers,
            "decompressor initialized"
        );

        Ok(Self {
            worker_limit: Arc::new(tokio::sync::Semaphore::new(config.workers.max_workers)),
            config: Arc::new(config),
            manifest: Arc::new(manifest),
            cache: Arc::new(cache),
            source: blobs,
            methods: Arc::new(methods),
            event_tx,
        })
    }

    /// Run [`decompress`](Self::decompress) on a background task
    ///
    /// `callback` receives the same result `decompress` would return. Must be
    /// called from within a tokio runtime.
    pub fn decompress_with_callback<F>(
        &self,
        group: impl Into<String>,
        callback: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Result<DecompressReport>) + Send + 'static,
    {
        let nano = self.clone();
        let group = group.into();
        tokio::spawn(async move {
            let result = nano.decompress(&group).await;
            callback(result);
        })
    }

    /// Whether `group` was marked finished by its last successful run
    ///
    /// A persisted hint that skips nothing: [`decompress`](Self::decompress)
    /// always verifies files on disk.
    pub async fn is_group_finished(&self, group: &str) -> Result<bool> {
        self.cache.is_group_finished(group).await
    }

    /// Working directory of the running package version
    ///
    /// Expanded files of every group land directly in this directory.
    pub fn working_dir(&self) -> Result<PathBuf> {
        self.cache.current_working_dir()
    }

    /// Every group of the configured variant
    pub fn groups(&self) -> Vec<String> {
        self.manifest.group_names()
    }

    /// Subscribe to decompression events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than 256 events receives
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}
