//! File layout metadata produced by the packer
//!
//! The packer records, per platform variant, every expected output file and
//! where its bytes sit inside which blob. [`CompressManifest`] is that record
//! as loaded from JSON; [`GroupManifest`] is the validated, per-group view
//! for the variant this process runs on.

use crate::error::{Error, Result};
use crate::types::FileDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Packer output covering every platform variant
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompressManifest {
    /// Id of the compression method every blob was packed with
    pub compress_method: u8,
    /// Descriptor lists keyed by platform variant
    pub variants: BTreeMap<String, Vec<FileDescriptor>>,
}

impl CompressManifest {
    /// Parse a manifest from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a manifest file
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Build the validated group view for one platform variant
    pub fn group_manifest(&self, variant: &str) -> Result<GroupManifest> {
        let descriptors = self.variants.get(variant).ok_or_else(|| {
            Error::config(
                format!(
                    "variant {variant} not in manifest, available variants: {:?}",
                    self.variants.keys().collect::<Vec<_>>()
                ),
                "variant",
            )
        })?;
        GroupManifest::new(self.compress_method, descriptors.clone())
    }
}

/// Descriptors of one platform variant, grouped by group name
///
/// Immutable once built. Group order and descriptor order within a group
/// follow the packer's order.
#[derive(Clone, Debug)]
pub struct GroupManifest {
    compress_method: u8,
    groups: Vec<(String, Vec<FileDescriptor>)>,
}

impl GroupManifest {
    /// Validate `descriptors` and group them
    pub fn new(compress_method: u8, descriptors: Vec<FileDescriptor>) -> Result<Self> {
        validate(&descriptors)?;

        let mut groups: Vec<(String, Vec<FileDescriptor>)> = Vec::new();
        for d in descriptors {
            match groups.iter_mut().find(|(name, _)| *name == d.group) {
                Some((_, list)) => list.push(d),
                None => groups.push((d.group.clone(), vec![d])),
            }
        }
        Ok(Self {
            compress_method,
            groups,
        })
    }

    /// Compression method id in effect
    pub fn compress_method(&self) -> u8 {
        self.compress_method
    }

    /// Descriptors of `group`, or `None` for an unknown group
    pub fn group(&self, group: &str) -> Option<&[FileDescriptor]> {
        self.groups
            .iter()
            .find(|(name, _)| name == group)
            .map(|(_, list)| list.as_slice())
    }

    /// Every group name, in manifest order
    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Every descriptor of every group
    pub fn all_descriptors(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.groups.iter().flat_map(|(_, list)| list.iter())
    }
}

fn validate(descriptors: &[FileDescriptor]) -> Result<()> {
    let mut names = HashSet::new();
    let mut by_blob: BTreeMap<&str, Vec<&FileDescriptor>> = BTreeMap::new();

    for d in descriptors {
        if d.name.is_empty() || d.group.is_empty() || d.compressed_blob_name.is_empty() {
            return Err(Error::config(
                format!("descriptor {d:?} has an empty name, group or blob"),
                "variants",
            ));
        }
        // Files of all groups share one working directory
        if !names.insert(d.name.as_str()) {
            return Err(Error::config(
                format!("file {} is listed more than once", d.name),
                "variants",
            ));
        }
        if d.end_pos < d.begin_pos || d.end_pos - d.begin_pos != d.file_size {
            return Err(Error::config(
                format!(
                    "file {} range [{}, {}) does not match size {}",
                    d.name, d.begin_pos, d.end_pos, d.file_size
                ),
                "variants",
            ));
        }
        by_blob
            .entry(d.compressed_blob_name.as_str())
            .or_default()
            .push(d);
    }

    for (blob, mut list) in by_blob {
        list.sort_by_key(|d| (d.begin_pos, d.end_pos));
        for pair in list.windows(2) {
            if pair[1].begin_pos < pair[0].end_pos {
                return Err(Error::config(
                    format!(
                        "files {} and {} overlap in blob {blob}",
                        pair[0].name, pair[1].name
                    ),
                    "variants",
                ));
            }
        }
    }
    Ok(())
}
