//! File integrity check values
//!
//! A check value is the CRC-32 of a file's contents plus its length. It is
//! cheap enough to compute on every start and catches truncation as well as
//! bit flips. A missing or unreadable file has check value `0`, which only an
//! empty file shares.

use crate::types::{CheckValue, FileDescriptor};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Compute the check value of the file at `path`
///
/// Reads the file in `buffer_size` chunks. Returns `0` if the file does not
/// exist or cannot be read.
pub fn check_value(path: &Path, buffer_size: usize) -> CheckValue {
    match compute(path, buffer_size) {
        Ok(value) => value,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(?path, "file does not exist");
            0
        }
        Err(e) => {
            warn!(?path, error = %e, "failed to compute check value");
            0
        }
    }
}

fn compute(path: &Path, buffer_size: usize) -> std::io::Result<CheckValue> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut length: u64 = 0;
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        length += n as u64;
    }
    Ok(u64::from(hasher.finalize()) + length)
}

/// Check value of an in-memory buffer, as the packer computes it
pub fn check_value_of(bytes: &[u8]) -> CheckValue {
    u64::from(crc32fast::hash(bytes)) + bytes.len() as u64
}

/// Return every descriptor whose file in `work_dir` does not match its check value
///
/// Used before expansion (what is missing or stale) and after it (did
/// expansion succeed). Order of `descriptors` is preserved.
pub fn filter_needing_expansion(
    work_dir: &Path,
    descriptors: &[FileDescriptor],
    buffer_size: usize,
) -> Vec<FileDescriptor> {
    descriptors
        .iter()
        .filter(|d| {
            let path = work_dir.join(&d.name);
            let actual = check_value(&path, buffer_size);
            // An empty file's value is 0, same as a missing one
            if actual != d.check_value || (actual == 0 && !path.is_file()) {
                debug!(
                    file = %d.name,
                    expected = d.check_value,
                    actual,
                    "check value mismatch"
                );
                true
            } else {
                false
            }
        })
        .cloned()
        .collect()
}
