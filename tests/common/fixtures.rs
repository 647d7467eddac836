//! Packed library fixtures: blobs, manifests and packages built like the packer does

use nanopack::integrity::check_value_of;
use nanopack::{CompressManifest, CompressMethod, FileDescriptor};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Platform variant every fixture is packed for
pub const TEST_VARIANT: &str = "arm64-v8a";

/// Bytes of padding the packer leaves between files
pub const PADDING: usize = 13;

/// Deterministic pseudo-library content
pub fn library_bytes(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_mul(31).wrapping_add((i % 251) as u8))
        .collect()
}

/// Builds zstd blobs out of named files, recording their descriptors
#[derive(Default)]
pub struct PackBuilder {
    blobs: BTreeMap<String, (Vec<u8>, Vec<FileDescriptor>)>,
}

/// Output of [`PackBuilder::build`]
pub struct Packed {
    /// Compressed blob bytes by blob name
    pub blobs: BTreeMap<String, Vec<u8>>,
    /// Manifest describing every file
    pub manifest: CompressManifest,
}

impl PackBuilder {
    /// Append `content` as file `name` of `group` to `blob`
    pub fn file(mut self, blob: &str, group: &str, name: &str, content: &[u8]) -> Self {
        let (stream, descriptors) = self.blobs.entry(blob.to_string()).or_default();
        if !stream.is_empty() {
            stream.extend_from_slice(&[0u8; PADDING]);
        }
        let begin = stream.len() as u64;
        stream.extend_from_slice(content);
        descriptors.push(FileDescriptor {
            name: name.to_string(),
            group: group.to_string(),
            compressed_blob_name: blob.to_string(),
            file_size: content.len() as u64,
            begin_pos: begin,
            end_pos: begin + content.len() as u64,
            check_value: check_value_of(content),
        });
        self
    }

    /// Compress every blob and produce the manifest
    pub fn build(self) -> Packed {
        let mut blobs = BTreeMap::new();
        let mut descriptors = Vec::new();
        for (blob, (stream, files)) in self.blobs {
            blobs.insert(blob, zstd::encode_all(stream.as_slice(), 3).unwrap());
            descriptors.extend(files);
        }
        Packed {
            blobs,
            manifest: CompressManifest {
                compress_method: CompressMethod::Zstd.id(),
                variants: BTreeMap::from([(TEST_VARIANT.to_string(), descriptors)]),
            },
        }
    }
}

impl Packed {
    /// Write the blobs as plain files into `dir`
    pub fn write_blobs(&self, dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        for (name, bytes) in &self.blobs {
            std::fs::write(dir.join(name), bytes).unwrap();
        }
    }

    /// Write a zip package holding the blobs under `prefix`, plus the manifest
    pub fn write_package(&self, path: &Path, prefix: &str) -> PathBuf {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, bytes) in &self.blobs {
            zip.start_file(format!("{prefix}{name}"), options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.start_file("assets/nano-manifest.json", options).unwrap();
        zip.write_all(serde_json::to_string(&self.manifest).unwrap().as_bytes())
            .unwrap();
        zip.finish().unwrap();
        path.to_path_buf()
    }

    /// Descriptors of `group`
    pub fn group(&self, group: &str) -> Vec<FileDescriptor> {
        self.manifest.variants[TEST_VARIANT]
            .iter()
            .filter(|d| d.group == group)
            .cloned()
            .collect()
    }
}

/// The library set most tests use: two groups spread over three blobs
pub fn standard_pack() -> PackBuilder {
    PackBuilder::default()
        .file("libnano_0.so", "base", "libc++_shared.so", &library_bytes(1, 48_000))
        .file("libnano_0.so", "base", "libcore.so", &library_bytes(2, 9_000))
        .file("libnano_1.so", "base", "libutil.so", &library_bytes(3, 1_200))
        .file("libnano_1.so", "media", "libcodec.so", &library_bytes(4, 120_000))
        .file("libnano_2.so", "media", "libfilters.so", &library_bytes(5, 333))
}
