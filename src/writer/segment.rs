//! One output file backed by a writable memory map
//!
//! The demultiplexer owns one [`SegmentWriter`] per descriptor and feeds it
//! the slice of the decompressed stream that falls inside its range.

use crate::error::{Error, Result};
use memmap2::MmapMut;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Writes one target file through a memory-mapped region of its final size
///
/// The file is created (or truncated/extended) to exactly `file_size` bytes up
/// front, so bytes can land at any offset without further system calls.
/// Closing schedules an asynchronous flush of the mapping and returns
/// without waiting for it to reach disk.
#[derive(Debug)]
pub struct SegmentWriter {
    path: PathBuf,
    begin_pos: u64,
    end_pos: u64,
    cursor: u64,
    map: Option<MmapMut>,
}

impl SegmentWriter {
    /// Create the writer for a file occupying `[begin_pos, begin_pos + file_size)`
    /// of the decompressed stream
    pub fn create(path: &Path, begin_pos: u64, file_size: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() != file_size {
            file.set_len(file_size)?;
        }

        // Zero-length mappings are rejected by the OS; an empty file needs none
        let map = if file_size == 0 {
            None
        } else {
            Some(map_file(&file, path)?)
        };

        Ok(Self {
            path: path.to_path_buf(),
            begin_pos,
            end_pos: begin_pos + file_size,
            cursor: 0,
            map,
        })
    }

    /// Stream position of the file's first byte
    pub fn begin_pos(&self) -> u64 {
        self.begin_pos
    }

    /// Stream position one past the file's last byte
    pub fn end_pos(&self) -> u64 {
        self.end_pos
    }

    /// Final size of the file
    pub fn len(&self) -> u64 {
        self.end_pos - self.begin_pos
    }

    /// Whether the file is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the target file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `data` at the sequential write cursor
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.write_at(self.cursor, data)?;
        self.cursor += data.len() as u64;
        Ok(())
    }

    /// Write `data` at `offset` bytes into the file
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| {
                Error::Other(format!(
                    "write of {} bytes at offset {} exceeds size {} of {}",
                    data.len(),
                    offset,
                    self.len(),
                    self.path.display()
                ))
            })?;
        let map = self.map.as_mut().ok_or_else(|| {
            Error::Other(format!("{} is already closed", self.path.display()))
        })?;
        map[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Release the mapping, scheduling its contents to be flushed to disk
    pub fn close(mut self) {
        self.flush_and_unmap();
    }

    fn flush_and_unmap(&mut self) {
        if let Some(map) = self.map.take() {
            if let Err(e) = map.flush_async() {
                warn!(path = ?self.path, error = %e, "failed to schedule flush to disk");
            }
        }
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        self.flush_and_unmap();
    }
}

fn map_file(file: &File, path: &Path) -> Result<MmapMut> {
    // SAFETY: the file was just sized by this writer and is only written
    // through this mapping while the group lock is held; nothing truncates it
    // while mapped.
    unsafe { MmapMut::map_mut(file) }.map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to map {}: {}", path.display(), e),
        ))
    })
}
