//! Where compressed blobs come from
//!
//! A blob is usually found either already extracted next to the
//! application (a native library directory) or as an entry inside the
//! application package itself. [`ChainedBlobSource`] tries several
//! locations in order.

use crate::error::{Error, Result, StreamError};
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use tracing::{debug, warn};
use zip::CompressionMethod;
use zip::result::ZipError;

/// Chunk size handed across the pipe for compressed package entries
const PIPE_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered in the pipe before the pump thread blocks
const PIPE_DEPTH: usize = 4;

/// Provides the raw (still compressed) byte stream of a blob
pub trait BlobSource: Send + Sync {
    /// Open a fresh stream for `blob`
    ///
    /// Absence must be reported as [`StreamError::BlobNotFound`] so that a
    /// chained source can move on to its next location.
    fn open(&self, blob: &str) -> Result<Box<dyn Read + Send>>;
}

/// Blobs stored as plain files in one directory
#[derive(Clone, Debug)]
pub struct DirBlobSource {
    dir: PathBuf,
}

impl DirBlobSource {
    /// Serve blobs from `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl BlobSource for DirBlobSource {
    fn open(&self, blob: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.dir.join(blob);
        match File::open(&path) {
            Ok(file) => {
                debug!(?path, "opened extracted blob");
                Ok(Box::new(BufReader::new(file)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StreamError::BlobNotFound {
                blob: blob.to_string(),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Blobs stored as entries of one or more zip packages
///
/// Packages are searched in the order given, so list the main package first
/// and split packages after it. Entries are looked up as
/// `<entry_prefix><blob>`.
#[derive(Clone, Debug)]
pub struct PackageBlobSource {
    packages: Vec<PathBuf>,
    entry_prefix: String,
}

impl PackageBlobSource {
    /// Serve blobs from the root of the given packages
    pub fn new<I, P>(packages: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            packages: packages
                .into_iter()
                .map(|p| p.as_ref().to_path_buf())
                .collect(),
            entry_prefix: String::new(),
        }
    }

    /// Look entries up under `prefix` (e.g. `"lib/arm64-v8a/"`)
    pub fn with_entry_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.entry_prefix = prefix.into();
        self
    }

    /// Open `entry` of `package` as a stream, `None` when either is absent
    ///
    /// Stored entries are read straight from the package file. Anything else
    /// is inflated on a pump thread feeding a bounded pipe, so at most a few
    /// chunks of a blob are ever held in memory.
    fn open_entry(&self, package: &Path, entry: &str) -> Result<Option<Box<dyn Read + Send>>> {
        let file = match File::open(package) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(?package, "package does not exist, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
        let (method, data_start, compressed_size) = match archive.by_name(entry) {
            Ok(f) => (f.compression(), f.data_start(), f.compressed_size()),
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(Error::Archive(e)),
        };

        if method == CompressionMethod::Stored {
            let mut file = File::open(package)?;
            file.seek(SeekFrom::Start(data_start))?;
            debug!(?package, entry, data_start, size = compressed_size, "streaming stored entry");
            return Ok(Some(Box::new(BufReader::new(file.take(compressed_size)))));
        }

        debug!(?package, entry, ?method, "streaming compressed entry through pipe");
        let (tx, rx) = sync_channel(PIPE_DEPTH);
        let entry = entry.to_string();
        std::thread::Builder::new()
            .name(format!("nano-pipe-{entry}"))
            .spawn(move || pump_entry(archive, &entry, &tx))?;
        Ok(Some(Box::new(PipeReader::new(rx))))
    }
}

/// Copy an entry's inflated bytes into the pipe until EOF, an error, or the reader goes away
fn pump_entry<R: Read + Seek>(
    mut archive: zip::ZipArchive<R>,
    entry: &str,
    tx: &SyncSender<io::Result<Vec<u8>>>,
) {
    let mut zip_file = match archive.by_name(entry) {
        Ok(f) => f,
        Err(e) => {
            tx.send(Err(io::Error::other(e))).ok();
            return;
        }
    };
    loop {
        let mut chunk = vec![0u8; PIPE_CHUNK_SIZE];
        match zip_file.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => {
                chunk.truncate(n);
                if tx.send(Ok(chunk)).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tx.send(Err(e)).ok();
                return;
            }
        }
    }
}

/// Reading end of the pipe filled by [`pump_entry`]
struct PipeReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl PipeReader {
    fn new(rx: Receiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.chunk.len() {
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Ok(Err(e)) => return Err(e),
                // Pump finished and hung up
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl BlobSource for PackageBlobSource {
    fn open(&self, blob: &str) -> Result<Box<dyn Read + Send>> {
        let entry = format!("{}{}", self.entry_prefix, blob);
        for package in &self.packages {
            if let Some(stream) = self.open_entry(package, &entry)? {
                return Ok(stream);
            }
        }
        Err(StreamError::BlobNotFound {
            blob: blob.to_string(),
        }
        .into())
    }
}

/// Tries each source in order until one has the blob
#[derive(Default)]
pub struct ChainedBlobSource {
    sources: Vec<Box<dyn BlobSource>>,
}

impl ChainedBlobSource {
    /// An empty chain; every lookup fails until sources are added
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source to the chain
    pub fn with(mut self, source: impl BlobSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl BlobSource for ChainedBlobSource {
    fn open(&self, blob: &str) -> Result<Box<dyn Read + Send>> {
        for source in &self.sources {
            match source.open(blob) {
                Err(Error::Stream(StreamError::BlobNotFound { .. })) => continue,
                other => return other,
            }
        }
        Err(StreamError::BlobNotFound {
            blob: blob.to_string(),
        }
        .into())
    }
}
