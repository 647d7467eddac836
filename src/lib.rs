//! # nanopack
//!
//! Lazy expansion of compressed native libraries.
//!
//! Native libraries are packed at build time into a few compressed blobs and
//! shipped inside the application package. On first use, nanopack expands
//! each group of libraries into a per-version working directory, verifies
//! every file against a CRC-32 + length check value, and keeps the result
//! across restarts and, where the bytes did not change, across upgrades.
//!
//! ## Design Philosophy
//!
//! - **Verify, never trust** - every `decompress` call checks files on disk
//! - **Safe across processes** - expansion of a group is serialized by an OS file lock
//! - **Library-first** - hosts supply blob sources and, if needed, decompression methods
//! - **Event-driven** - consumers subscribe to progress events
//!
//! ## Quick Start
//!
//! ```no_run
//! use nanopack::{ChainedBlobSource, CompressManifest, Config, DirBlobSource, Nano, PackageBlobSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         package_path: "/opt/app/base.pkg".into(),
//!         variant: "arm64-v8a".to_string(),
//!         ..Default::default()
//!     };
//!     let manifest = CompressManifest::from_path("/opt/app/nano-manifest.json".as_ref())?;
//!     let blobs = ChainedBlobSource::new()
//!         .with(DirBlobSource::new("/opt/app/lib"))
//!         .with(PackageBlobSource::new(["/opt/app/base.pkg"]).with_entry_prefix("lib/arm64-v8a/"));
//!
//!     let nano = Nano::new(config, &manifest, Arc::new(blobs)).await?;
//!
//!     let report = nano.decompress("base").await?;
//!     println!("expanded {:?} into {}", report.expanded, nano.working_dir()?.display());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Per-version working directories and upgrade migration
pub mod cache;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Top-level decompressor
pub mod decompressor;
/// Error types
pub mod error;
/// File check values
pub mod integrity;
/// Cross-process group locks
pub mod lock;
/// Packer manifest
pub mod manifest;
/// Decompression methods
pub mod method;
/// Persisted key/value state
pub mod preferences;
/// Bounded retry
pub mod retry;
/// Blob sources
pub mod source;
/// Single-blob decompression task
pub mod task;
/// Core types and events
pub mod types;
/// Stream demultiplexing into memory-mapped files
pub mod writer;

// Re-export commonly used types
pub use cache::{CacheManager, MigrationReport};
pub use config::Config;
pub use db::Database;
pub use decompressor::Nano;
pub use error::{DatabaseError, Error, ErrorClass, Result, StreamError};
pub use manifest::{CompressManifest, GroupManifest};
pub use method::{CompressMethod, DecompressMethod, MethodRegistry, ZstdMethod};
pub use preferences::{MemoryPreferences, PreferenceStore};
pub use source::{BlobSource, ChainedBlobSource, DirBlobSource, PackageBlobSource};
pub use types::{
    CheckValue, DecompressReport, Event, FileDescriptor, Fingerprint, PackageInfo, Stage,
};
