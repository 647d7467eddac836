//! Error types for nanopack
//!
//! This module provides the error handling for the library:
//! - One top-level [`Error`] returned by every public operation
//! - Nested domain errors for stream failures and persisted state
//! - A coarse [`ErrorClass`] so hosts can tell configuration problems apart
//!   from corrupt output or I/O trouble without matching every variant

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for nanopack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nanopack
///
/// Each variant carries enough context (group, blob, file names, paths) to
/// diagnose a failure from its `Display` output alone.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "compress_method")
        key: Option<String>,
    },

    /// The requested group is not part of the manifest
    #[error("group: {group} not found, available groups: {known:?}")]
    UnknownGroup {
        /// The group that was requested
        group: String,
        /// Every group the manifest knows about
        known: Vec<String>,
    },

    /// Reading or decoding a blob stream failed
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// A decompression task failed on every attempt
    #[error("decompress {blob} fail after {attempts} attempts: {source}")]
    TaskFailed {
        /// The blob that could not be expanded
        blob: String,
        /// Total number of attempts made (first try plus retries)
        attempts: u32,
        /// The cause reported by the last attempt
        source: Box<Error>,
    },

    /// Files still fail verification after expansion
    #[error("decompress failed for group {group}, some files are still invalid: {files:?}")]
    Integrity {
        /// The group being expanded
        group: String,
        /// Names of the files whose check value does not match
        files: Vec<String>,
    },

    /// Acquiring a lock file failed
    #[error("failed to lock {path}: {source}")]
    Lock {
        /// The lock file
        path: PathBuf,
        /// The underlying I/O failure
        source: std::io::Error,
    },

    /// Persisted state operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Package archive could not be read
    #[error("package archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Failures while producing or consuming a decompressed blob stream
#[derive(Debug, Error)]
pub enum StreamError {
    /// No blob source could provide the named blob
    #[error("compressed file not found: {blob}")]
    BlobNotFound {
        /// The blob that was requested
        blob: String,
    },

    /// The stream ended before every target range was filled
    #[error("stream ended at position {position}, expected data up to {expected}")]
    Truncated {
        /// Stream position where input ran out
        position: u64,
        /// Position the last target range ends at
        expected: u64,
    },

    /// Skipping to the first target range failed
    #[error("failed to skip to position {wanted}, stream ended after {skipped} bytes")]
    SkipFailed {
        /// Number of bytes that had to be skipped
        wanted: u64,
        /// Number of bytes actually skipped
        skipped: u64,
    },

    /// The decompression method rejected the input
    #[error("decoder error for {blob}: {reason}")]
    Decoder {
        /// The blob being decoded
        blob: String,
        /// The decoder's error message
        reason: String,
    },
}

/// Persisted state errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Coarse classification of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Unknown group, unconfigured method, bad manifest; never retried
    Configuration,
    /// Missing blob, truncated or undecodable stream
    Stream,
    /// Expanded output does not match its check value
    Integrity,
    /// Lock file could not be acquired
    Lock,
    /// Everything else (I/O, persisted state, internal)
    Internal,
}

impl Error {
    /// Build a configuration error tied to a config key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config { .. } | Error::UnknownGroup { .. } => ErrorClass::Configuration,
            Error::Stream(_) | Error::Archive(_) => ErrorClass::Stream,
            // A task reports the class of whatever made its last attempt fail
            Error::TaskFailed { source, .. } => source.class(),
            Error::Integrity { .. } => ErrorClass::Integrity,
            Error::Lock { .. } => ErrorClass::Lock,
            Error::Database(_)
            | Error::Sqlx(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Other(_) => ErrorClass::Internal,
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::UnknownGroup { .. } => "unknown_group",
            Error::Stream(e) => match e {
                StreamError::BlobNotFound { .. } => "blob_not_found",
                StreamError::Truncated { .. } => "stream_truncated",
                StreamError::SkipFailed { .. } => "skip_failed",
                StreamError::Decoder { .. } => "decoder_error",
            },
            Error::TaskFailed { .. } => "task_failed",
            Error::Integrity { .. } => "integrity_error",
            Error::Lock { .. } => "lock_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Archive(_) => "archive_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn all_error_variants() -> Vec<(Error, ErrorClass, &'static str)> {
        vec![
            (
                Error::config("bad value", "workers.max_workers"),
                ErrorClass::Configuration,
                "config_error",
            ),
            (
                Error::UnknownGroup {
                    group: "video".into(),
                    known: vec!["base".into()],
                },
                ErrorClass::Configuration,
                "unknown_group",
            ),
            (
                Error::Stream(StreamError::BlobNotFound {
                    blob: "libnano_0.so".into(),
                }),
                ErrorClass::Stream,
                "blob_not_found",
            ),
            (
                Error::Stream(StreamError::Truncated {
                    position: 10,
                    expected: 20,
                }),
                ErrorClass::Stream,
                "stream_truncated",
            ),
            (
                Error::Stream(StreamError::SkipFailed {
                    wanted: 10,
                    skipped: 3,
                }),
                ErrorClass::Stream,
                "skip_failed",
            ),
            (
                Error::Integrity {
                    group: "base".into(),
                    files: vec!["liba.so".into()],
                },
                ErrorClass::Integrity,
                "integrity_error",
            ),
            (
                Error::Lock {
                    path: PathBuf::from("/tmp/base.lock"),
                    source: std::io::Error::other("denied"),
                },
                ErrorClass::Lock,
                "lock_error",
            ),
            (
                Error::Database(DatabaseError::QueryFailed("timeout".into())),
                ErrorClass::Internal,
                "database_error",
            ),
            (
                Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
                ErrorClass::Internal,
                "io_error",
            ),
            (Error::Other("unknown".into()), ErrorClass::Internal, "internal_error"),
        ]
    }

    #[test]
    fn every_variant_has_expected_class_and_code() {
        for (error, class, code) in all_error_variants() {
            assert_eq!(error.class(), class, "class mismatch for {error}");
            assert_eq!(error.error_code(), code, "code mismatch for {error}");
        }
    }

    #[test]
    fn task_failure_inherits_class_of_cause() {
        let err = Error::TaskFailed {
            blob: "libnano_1.so".into(),
            attempts: 4,
            source: Box::new(Error::Stream(StreamError::BlobNotFound {
                blob: "libnano_1.so".into(),
            })),
        };
        assert_eq!(err.class(), ErrorClass::Stream);
        assert_eq!(err.error_code(), "task_failed");
    }

    #[test]
    fn unknown_group_message_lists_known_groups() {
        let err = Error::UnknownGroup {
            group: "video".into(),
            known: vec!["base".into(), "camera".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("video"));
        assert!(msg.contains("base"));
        assert!(msg.contains("camera"));
    }

    #[test]
    fn task_failure_message_names_blob_and_cause() {
        let err = Error::TaskFailed {
            blob: "libnano_2.so".into(),
            attempts: 4,
            source: Box::new(Error::Stream(StreamError::Truncated {
                position: 5,
                expected: 9,
            })),
        };
        let msg = err.to_string();
        assert!(msg.contains("libnano_2.so"));
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("stream ended at position 5"));
    }
}
