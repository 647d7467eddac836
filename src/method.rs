//! Pluggable stream decompression methods
//!
//! Exactly one method is in effect per deployment, selected by the manifest's
//! `compress_method` id. Zstandard ships built in; anything else (xz, for
//! instance) is registered by the host through [`MethodRegistry::register`].

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

/// Compression method ids written by the packer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressMethod {
    /// Zstandard
    Zstd = 1,
    /// XZ / LZMA2
    Xz = 2,
}

impl CompressMethod {
    /// Look up a method by its numeric id
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(CompressMethod::Zstd),
            2 => Some(CompressMethod::Xz),
            _ => None,
        }
    }

    /// Numeric id of this method
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for CompressMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressMethod::Zstd => write!(f, "zstd"),
            CompressMethod::Xz => write!(f, "xz"),
        }
    }
}

/// Turns a raw compressed stream into its decompressed byte stream
///
/// Implementations must be thread-safe: one instance serves every task of a
/// decompression run.
pub trait DecompressMethod: Send + Sync {
    /// Wrap `raw` in a reader yielding decompressed bytes
    fn decompressed_stream(&self, raw: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>>;

    /// Human-readable name for logging
    fn name(&self) -> &str;
}

/// Zstandard decompression
#[derive(Clone, Copy, Debug, Default)]
pub struct ZstdMethod;

impl DecompressMethod for ZstdMethod {
    fn decompressed_stream(&self, raw: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(zstd::stream::read::Decoder::new(raw)?))
    }

    fn name(&self) -> &str {
        "zstd"
    }
}

/// Registry of available decompression methods
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<CompressMethod, Arc<dyn DecompressMethod>>,
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.methods.keys().map(ToString::to_string).collect();
        names.sort();
        f.debug_struct("MethodRegistry")
            .field("methods", &names)
            .finish()
    }
}

impl MethodRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in methods
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CompressMethod::Zstd, Arc::new(ZstdMethod));
        registry
    }

    /// Register (or replace) the implementation of `method`
    pub fn register(&mut self, method: CompressMethod, implementation: Arc<dyn DecompressMethod>) {
        self.methods.insert(method, implementation);
    }

    /// Resolve a manifest method id to its implementation
    pub fn resolve(&self, id: u8) -> Result<Arc<dyn DecompressMethod>> {
        let method = CompressMethod::from_id(id).ok_or_else(|| {
            Error::config(
                format!("unsupported compression method: {id}"),
                "compress_method",
            )
        })?;
        self.methods.get(&method).cloned().ok_or_else(|| {
            Error::config(
                format!("compression method {method} ({id}) is not configured"),
                "compress_method",
            )
        })
    }
}
