//! Core types for nanopack

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

/// Combined checksum + length integrity value of one file
///
/// `0` is reserved for "file does not exist".
pub type CheckValue = u64;

/// One expected output file, as recorded by the build-time packer
///
/// Equality and hashing only look at `name` and `check_value`: two descriptors
/// for the same file content are interchangeable no matter which blob or
/// range they were packed into. This is what lets upgrade migration match
/// files across package versions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Unique file name within its group
    pub name: String,
    /// Logical bucket; all descriptors of a group are expanded together
    pub group: String,
    /// Blob whose decompressed stream contains this file
    pub compressed_blob_name: String,
    /// Exact expected byte length
    pub file_size: u64,
    /// First byte of the file in the decompressed stream
    pub begin_pos: u64,
    /// One past the last byte of the file in the decompressed stream
    pub end_pos: u64,
    /// Expected integrity value, computed at build time
    pub check_value: CheckValue,
}

impl FileDescriptor {
    /// Byte range of this file within the decompressed blob stream
    pub fn range(&self) -> std::ops::Range<u64> {
        self.begin_pos..self.end_pos
    }
}

impl PartialEq for FileDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.check_value == other.check_value
    }
}

impl Eq for FileDescriptor {}

impl Hash for FileDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.check_value.hash(state);
    }
}

/// Version fingerprint of an application package
///
/// Derived from the package's modification time (milliseconds) plus its
/// size. Cheap to compute and changes on every reinstall or upgrade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Working directory name for this version
    pub fn dir_name(&self) -> String {
        format!("nano{}", self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The installed application package
#[derive(Clone, Debug)]
pub struct PackageInfo {
    /// Path to the package file
    pub path: PathBuf,
}

impl PackageInfo {
    /// Describe the package at `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Compute the version fingerprint from the package's mtime and size
    pub fn fingerprint(&self) -> std::io::Result<Fingerprint> {
        let metadata = std::fs::metadata(&self.path)?;
        let modified_ms = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(Fingerprint(modified_ms.wrapping_add(metadata.len())))
    }
}

/// State of one `decompress(group)` attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Not started
    Idle,
    /// Group lock held
    LockAcquired,
    /// Checking files on disk
    Verifying,
    /// Running decompression tasks
    Expanding,
    /// Checking expanded files
    Reverifying,
    /// Every file verified
    Done,
    /// Terminal failure
    Failed,
}

impl Stage {
    /// Whether this stage ends the attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

/// Event emitted while a group is being decompressed
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Group lock acquired
    LockAcquired {
        /// Group name
        group: String,
    },

    /// Verifying files on disk
    Verifying {
        /// Group name
        group: String,
    },

    /// Expansion started
    Expanding {
        /// Group name
        group: String,
        /// Blobs that will be decompressed
        blobs: Vec<String>,
    },

    /// One blob finished expanding
    BlobExpanded {
        /// Group name
        group: String,
        /// Blob name
        blob: String,
    },

    /// Re-verifying expanded files
    Reverifying {
        /// Group name
        group: String,
    },

    /// Group fully verified
    Done {
        /// Group name
        group: String,
        /// Files that had to be expanded (empty on a warm start)
        expanded: Vec<String>,
    },

    /// Group attempt failed
    Failed {
        /// Group name
        group: String,
        /// Error description
        error: String,
    },
}

impl Event {
    /// The stage this event moves the attempt into
    pub fn stage(&self) -> Stage {
        match self {
            Event::LockAcquired { .. } => Stage::LockAcquired,
            Event::Verifying { .. } => Stage::Verifying,
            Event::Expanding { .. } | Event::BlobExpanded { .. } => Stage::Expanding,
            Event::Reverifying { .. } => Stage::Reverifying,
            Event::Done { .. } => Stage::Done,
            Event::Failed { .. } => Stage::Failed,
        }
    }
}

/// Outcome of a successful `decompress(group)`
#[must_use]
#[derive(Clone, Debug)]
pub struct DecompressReport {
    /// Group that was decompressed
    pub group: String,
    /// Files that were (re)expanded; empty when everything already verified
    pub expanded: Vec<String>,
    /// Blobs that were decompressed
    pub blobs: Vec<String>,
    /// Wall-clock time spent, lock wait included
    pub duration: Duration,
}

impl DecompressReport {
    /// Whether any expansion work was done
    pub fn did_work(&self) -> bool {
        !self.expanded.is_empty()
    }
}
