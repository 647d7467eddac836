//! Demultiplexing one decompressed stream into many files
//!
//! A blob's decompressed stream is the concatenation of several target files,
//! possibly with padding between them. [`MultiFileWriter`] reads the stream
//! once, front to back, and routes each byte range to the
//! [`SegmentWriter`] of the file that owns it.

mod segment;

pub use segment::SegmentWriter;

use crate::error::{Error, Result, StreamError};
use crate::types::FileDescriptor;
use std::io::{self, ErrorKind, Read};
use std::path::Path;
use tracing::debug;

/// Routes byte ranges of one stream to their target files
#[derive(Debug)]
pub struct MultiFileWriter {
    writers: Vec<SegmentWriter>,
    buffer_size: usize,
}

impl MultiFileWriter {
    /// Open one [`SegmentWriter`] per descriptor under `out_dir`
    ///
    /// Descriptors may come in any order; they are sorted by `begin_pos`.
    /// Overlapping ranges or a size that disagrees with the range are
    /// configuration errors.
    pub fn create(
        out_dir: &Path,
        descriptors: &[FileDescriptor],
        buffer_size: usize,
    ) -> Result<Self> {
        if descriptors.is_empty() {
            return Err(Error::Config {
                message: "no files to write".to_string(),
                key: None,
            });
        }

        let mut sorted: Vec<&FileDescriptor> = descriptors.iter().collect();
        sorted.sort_by_key(|d| (d.begin_pos, d.end_pos));
        validate_ranges(&sorted)?;

        let mut writers = Vec::with_capacity(sorted.len());
        for d in sorted {
            writers.push(SegmentWriter::create(
                &out_dir.join(&d.name),
                d.begin_pos,
                d.file_size,
            )?);
        }

        Ok(Self {
            writers,
            buffer_size: buffer_size.max(1),
        })
    }

    /// Stream position of the first byte any file needs
    pub fn begin_pos(&self) -> u64 {
        self.writers.first().map_or(0, SegmentWriter::begin_pos)
    }

    /// Stream position one past the last byte any file needs
    pub fn end_pos(&self) -> u64 {
        self.writers.iter().map(SegmentWriter::end_pos).max().unwrap_or(0)
    }

    /// Consume `input` and fill every file
    ///
    /// Reads never go past [`end_pos`](Self::end_pos), so trailing data in the
    /// stream is left unread. Returns the stream position reached.
    pub fn write_from<R: Read>(&mut self, input: &mut R) -> Result<u64> {
        let first = self.begin_pos();
        let skipped = skip(input, first)?;
        if skipped < first {
            return Err(StreamError::SkipFailed {
                wanted: first,
                skipped,
            }
            .into());
        }

        let expected = self.end_pos();
        let mut buf = vec![0u8; self.buffer_size];
        let mut position = first;
        let mut index = 0;

        while let Some(writer) = self.writers.get_mut(index) {
            if position >= writer.end_pos() {
                index += 1;
                continue;
            }
            if position < writer.begin_pos() {
                // Padding between files
                let gap = writer.begin_pos() - position;
                let skipped = skip(input, gap)?;
                position += skipped;
                if skipped < gap {
                    return Err(StreamError::Truncated { position, expected }.into());
                }
                continue;
            }

            let want = (writer.end_pos() - position).min(buf.len() as u64) as usize;
            let n = read_some(input, &mut buf[..want])?;
            if n == 0 {
                return Err(StreamError::Truncated { position, expected }.into());
            }
            writer.write(&buf[..n])?;
            position += n as u64;
        }

        debug!(files = self.writers.len(), position, "all files written");
        Ok(position)
    }

    /// Close every file, scheduling their flush to disk
    pub fn close(self) {
        for writer in self.writers {
            writer.close();
        }
    }
}

fn validate_ranges(sorted: &[&FileDescriptor]) -> Result<()> {
    for d in sorted {
        if d.end_pos < d.begin_pos || d.end_pos - d.begin_pos != d.file_size {
            return Err(Error::config(
                format!(
                    "{} range [{}, {}) does not match size {}",
                    d.name, d.begin_pos, d.end_pos, d.file_size
                ),
                "file_size",
            ));
        }
    }
    for pair in sorted.windows(2) {
        if pair[1].begin_pos < pair[0].end_pos {
            return Err(Error::config(
                format!(
                    "{} [{}, {}) overlaps {} [{}, {})",
                    pair[0].name,
                    pair[0].begin_pos,
                    pair[0].end_pos,
                    pair[1].name,
                    pair[1].begin_pos,
                    pair[1].end_pos
                ),
                "begin_pos",
            ));
        }
    }
    Ok(())
}

fn skip<R: Read>(input: &mut R, n: u64) -> Result<u64> {
    Ok(io::copy(&mut input.by_ref().take(n), &mut io::sink())?)
}

fn read_some<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize> {
    loop {
        match input.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
