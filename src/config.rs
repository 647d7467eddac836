//! Configuration types for nanopack

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for [`Nano`](crate::Nano)
///
/// Fields are organized into logical sub-configs:
/// - [`workers`](WorkerConfig): size of the decompression worker pool
/// - [`retry`](RetryConfig): per-blob retry policy
/// - [`io`](IoConfig): stream chunk sizes
/// - [`persistence`](PersistenceConfig): where persisted flags live
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Parent directory of the per-version working directories (default: "./nano-data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Application package whose mtime and size identify the installed version
    pub package_path: PathBuf,

    /// Platform variant selecting the manifest's descriptor list (e.g. "arm64-v8a")
    pub variant: String,

    /// Worker pool settings
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Retry policy for decompression tasks
    #[serde(default)]
    pub retry: RetryConfig,

    /// Stream I/O settings
    #[serde(default)]
    pub io: IoConfig,

    /// Persisted state settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            package_path: PathBuf::new(),
            variant: String::new(),
            workers: WorkerConfig::default(),
            retry: RetryConfig::default(),
            io: IoConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Check settings that would make decompression impossible
    pub fn validate(&self) -> Result<()> {
        if self.workers.max_workers == 0 {
            return Err(Error::config(
                "max_workers must be at least 1",
                "workers.max_workers",
            ));
        }
        if self.io.buffer_size == 0 {
            return Err(Error::config(
                "buffer_size must be greater than 0",
                "io.buffer_size",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::config(
                "backoff_multiplier must be a finite number of at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        Ok(())
    }
}

/// Worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum decompression tasks running at once (default: CPU count - 1, at least 1)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

/// Retry configuration for decompression tasks
///
/// Every failure is retried regardless of its cause; only the count and the
/// pause between attempts are configurable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first one fails (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 0, retry immediately)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 5 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Stream I/O configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IoConfig {
    /// Chunk size for stream reads and checksum passes (default: 32 KiB)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

/// Persisted state configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database holding the version fingerprint and group flags
    /// (default: "./nano-data/nano.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("nano-data")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("nano-data").join("nano.db")
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::ZERO
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

pub(crate) fn default_buffer_size() -> usize {
    32 * 1024
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
