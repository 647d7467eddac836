use super::*;
use crate::error::{Error, StreamError};
use crate::integrity::{check_value, check_value_of};
use crate::lock::group_lock_path;
use crate::method::{CompressMethod, DecompressMethod, MethodRegistry};
use crate::preferences::MemoryPreferences;
use crate::source::DirBlobSource;
use crate::types::FileDescriptor;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read};
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

const VARIANT: &str = "arm64-v8a";

/// Packs named files into zstd blobs the same way the build-time packer does
#[derive(Default)]
struct PackBuilder {
    blobs: BTreeMap<String, (Vec<u8>, Vec<FileDescriptor>)>,
}

impl PackBuilder {
    fn file(mut self, blob: &str, group: &str, name: &str, content: &[u8]) -> Self {
        let (stream, descriptors) = self.blobs.entry(blob.to_string()).or_default();
        // Padding between files exercises gap skipping
        if !stream.is_empty() {
            stream.extend_from_slice(&[0xAA; 13]);
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

    /// Write compressed blobs into `dir` and return the manifest
    fn write(self, dir: &Path) -> CompressManifest {
        std::fs::create_dir_all(dir).unwrap();
        let mut all = Vec::new();
        for (blob, (stream, descriptors)) in self.blobs {
            let compressed = zstd::encode_all(stream.as_slice(), 3).unwrap();
            std::fs::write(dir.join(&blob), compressed).unwrap();
            all.extend(descriptors);
        }
        CompressManifest {
            compress_method: CompressMethod::Zstd.id(),
            variants: BTreeMap::from([(VARIANT.to_string(), all)]),
        }
    }
}

fn content(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add((i % 251) as u8)).collect()
}

/// Counts opens per blob and can be told to fail a blob forever
struct CountingSource {
    inner: DirBlobSource,
    opens: Mutex<HashMap<String, u32>>,
    broken: Mutex<Vec<String>>,
}

impl CountingSource {
    fn new(dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: DirBlobSource::new(dir),
            opens: Mutex::new(HashMap::new()),
            broken: Mutex::new(Vec::new()),
        })
    }

    fn opens(&self, blob: &str) -> u32 {
        self.opens.lock().unwrap().get(blob).copied().unwrap_or(0)
    }

    fn total_opens(&self) -> u32 {
        self.opens.lock().unwrap().values().sum()
    }

    fn break_blob(&self, blob: &str) {
        self.broken.lock().unwrap().push(blob.to_string());
    }
}

impl BlobSource for CountingSource {
    fn open(&self, blob: &str) -> Result<Box<dyn Read + Send>> {
        *self.opens.lock().unwrap().entry(blob.to_string()).or_default() += 1;
        if self.broken.lock().unwrap().iter().any(|b| b == blob) {
            return Err(StreamError::BlobNotFound {
                blob: blob.to_string(),
            }
            .into());
        }
        self.inner.open(blob)
    }
}

struct Env {
    root: TempDir,
    prefs: Arc<MemoryPreferences>,
}

impl Env {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("app.pkg"), b"package version 1").unwrap();
        Self {
            root,
            prefs: Arc::new(MemoryPreferences::new()),
        }
    }

    fn blobs_dir(&self) -> PathBuf {
        self.root.path().join("blobs")
    }

    fn config(&self) -> Config {
        Config {
            data_dir: self.root.path().join("data"),
            package_path: self.root.path().join("app.pkg"),
            variant: VARIANT.to_string(),
            ..Default::default()
        }
    }

    fn upgrade_package(&self) {
        std::fs::write(
            self.root.path().join("app.pkg"),
            b"package version 2 with more bytes",
        )
        .unwrap();
    }

    async fn nano(&self, manifest: &CompressManifest, source: Arc<dyn BlobSource>) -> Nano {
        self.nano_with(manifest, source, MethodRegistry::with_defaults())
            .await
    }

    async fn nano_with(
        &self,
        manifest: &CompressManifest,
        source: Arc<dyn BlobSource>,
        methods: MethodRegistry,
    ) -> Nano {
        Nano::with_parts(self.config(), manifest, source, self.prefs.clone(), methods)
            .await
            .unwrap()
    }
}

fn two_blob_pack() -> PackBuilder {
    PackBuilder::default()
        .file("libnano_0.so", "base", "liba.so", &content(1, 4000))
        .file("libnano_0.so", "base", "libb.so", &content(2, 100))
        .file("libnano_1.so", "base", "libc.so", &content(3, 70_000))
        .file("libnano_1.so", "camera", "libcam.so", &content(4, 512))
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn fresh_decompress_expands_every_file() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let source = CountingSource::new(&env.blobs_dir());
    let nano = env.nano(&manifest, source.clone()).await;
    let mut events = nano.subscribe();

    let report = nano.decompress("base").await.unwrap();

    assert_eq!(report.group, "base");
    assert_eq!(report.expanded, vec!["liba.so", "libb.so", "libc.so"]);
    assert_eq!(report.blobs, vec!["libnano_0.so", "libnano_1.so"]);
    assert!(report.did_work());

    let dir = nano.working_dir().unwrap();
    for d in manifest.variants[VARIANT].iter().filter(|d| d.group == "base") {
        let path = dir.join(&d.name);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), d.file_size);
        assert_eq!(check_value(&path, 4096), d.check_value);
    }
    // Other groups are untouched
    assert!(!dir.join("libcam.so").exists());
    assert!(nano.is_group_finished("base").await.unwrap());
    assert!(!nano.is_group_finished("camera").await.unwrap());

    let stages: Vec<_> = drain(&mut events).iter().map(Event::stage).collect();
    assert_eq!(stages.first(), Some(&crate::types::Stage::LockAcquired));
    assert_eq!(stages.last(), Some(&crate::types::Stage::Done));
    assert!(stages.contains(&crate::types::Stage::Reverifying));
}

#[tokio::test]
async fn second_call_does_no_work() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let source = CountingSource::new(&env.blobs_dir());
    let nano = env.nano(&manifest, source.clone()).await;

    nano.decompress("base").await.unwrap();
    let opens = source.total_opens();

    let report = nano.decompress("base").await.unwrap();
    assert!(report.expanded.is_empty());
    assert!(report.blobs.is_empty());
    assert_eq!(source.total_opens(), opens, "no blob may be reopened");
}

#[tokio::test]
async fn unknown_group_lists_known_groups() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let nano = env.nano(&manifest, CountingSource::new(&env.blobs_dir())).await;
    let mut events = nano.subscribe();

    let err = nano.decompress("video").await.unwrap_err();

    match &err {
        Error::UnknownGroup { group, known } => {
            assert_eq!(group, "video");
            assert_eq!(known, &vec!["base".to_string(), "camera".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("available groups"));
    assert!(!group_lock_path(&nano.working_dir().unwrap(), "video").exists());
    assert!(matches!(drain(&mut events).as_slice(), [Event::Failed { .. }]));
}

#[tokio::test]
async fn corrupted_file_reexpands_only_its_blob() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let source = CountingSource::new(&env.blobs_dir());
    let nano = env.nano(&manifest, source.clone()).await;
    nano.decompress("base").await.unwrap();

    let dir = nano.working_dir().unwrap();
    let good_b = std::fs::read(dir.join("libb.so")).unwrap();
    let mut bytes = std::fs::read(dir.join("liba.so")).unwrap();
    bytes[17] ^= 0x01;
    std::fs::write(dir.join("liba.so"), &bytes).unwrap();

    let report = nano.decompress("base").await.unwrap();

    assert_eq!(report.expanded, vec!["liba.so"]);
    assert_eq!(report.blobs, vec!["libnano_0.so"]);
    assert_eq!(source.opens("libnano_0.so"), 2);
    assert_eq!(source.opens("libnano_1.so"), 1);
    assert!(nano.verify("base").await.unwrap().is_empty());
    assert_eq!(std::fs::read(dir.join("libb.so")).unwrap(), good_b);
}

#[tokio::test]
async fn truncated_file_is_detected() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let nano = env.nano(&manifest, CountingSource::new(&env.blobs_dir())).await;
    nano.decompress("base").await.unwrap();

    let path = nano.working_dir().unwrap().join("libc.so");
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(10).unwrap();

    let stale: Vec<String> = nano
        .verify("base")
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(stale, vec!["libc.so"]);

    let report = nano.decompress("base").await.unwrap();
    assert_eq!(report.expanded, vec!["libc.so"]);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 70_000);
}

#[tokio::test]
async fn failing_blob_is_tried_exactly_four_times() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let source = CountingSource::new(&env.blobs_dir());
    source.break_blob("libnano_1.so");
    let nano = env.nano(&manifest, source.clone()).await;

    let err = nano.decompress("base").await.unwrap_err();

    assert_eq!(source.opens("libnano_1.so"), 4);
    // The healthy blob still finished
    assert_eq!(source.opens("libnano_0.so"), 1);
    match &err {
        Error::TaskFailed { blob, attempts, .. } => {
            assert_eq!(blob, "libnano_1.so");
            assert_eq!(*attempts, 4);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("compressed file not found"));
    assert!(!nano.is_group_finished("base").await.unwrap());

    // Lock was released
    let lock_path = group_lock_path(&nano.working_dir().unwrap(), "base");
    assert!(crate::lock::ProcessLock::try_acquire(&lock_path).unwrap().is_some());
}

#[tokio::test]
async fn unconfigured_method_fails_without_retry() {
    let env = Env::new();
    let mut manifest = two_blob_pack().write(&env.blobs_dir());
    manifest.compress_method = CompressMethod::Xz.id();
    let source = CountingSource::new(&env.blobs_dir());
    let nano = env.nano(&manifest, source.clone()).await;

    let err = nano.decompress("base").await.unwrap_err();

    assert!(matches!(err, Error::Config { .. }));
    assert!(err.to_string().contains("not configured"));
    assert_eq!(source.total_opens(), 0);
}

/// Decodes zstd, then flips every byte
struct CorruptingMethod;

struct Inverted(Box<dyn Read + Send>);

impl Read for Inverted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.0.read(buf)?;
        buf[..n].iter_mut().for_each(|b| *b = !*b);
        Ok(n)
    }
}

impl DecompressMethod for CorruptingMethod {
    fn decompressed_stream(&self, raw: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        let decoded = crate::method::ZstdMethod.decompressed_stream(raw)?;
        Ok(Box::new(Inverted(decoded)))
    }

    fn name(&self) -> &str {
        "corrupting"
    }
}

#[tokio::test]
async fn wrong_output_is_integrity_failure() {
    let env = Env::new();
    let manifest = PackBuilder::default()
        .file("libnano_0.so", "base", "liba.so", &content(9, 300))
        .file("libnano_0.so", "base", "libb.so", &content(8, 200))
        .write(&env.blobs_dir());
    let mut methods = MethodRegistry::new();
    methods.register(CompressMethod::Zstd, Arc::new(CorruptingMethod));
    let source = CountingSource::new(&env.blobs_dir());
    let nano = env.nano_with(&manifest, source.clone(), methods).await;

    let err = nano.decompress("base").await.unwrap_err();

    match &err {
        Error::Integrity { group, files } => {
            assert_eq!(group, "base");
            assert_eq!(files, &vec!["liba.so".to_string(), "libb.so".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    // The task itself succeeded, so nothing was retried
    assert_eq!(source.opens("libnano_0.so"), 1);
    assert!(err.to_string().contains("still invalid"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_expand_once() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let source = CountingSource::new(&env.blobs_dir());

    // Two independent instances, as two processes would have
    let first = env.nano(&manifest, source.clone()).await;
    let second = Nano::with_parts(
        env.config(),
        &manifest,
        source.clone(),
        Arc::new(MemoryPreferences::new()),
        MethodRegistry::with_defaults(),
    )
    .await
    .unwrap();
    assert_eq!(first.working_dir().unwrap(), second.working_dir().unwrap());

    let (a, b) = tokio::join!(first.decompress("base"), second.decompress("base"));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(source.opens("libnano_0.so"), 1);
    assert_eq!(source.opens("libnano_1.so"), 1);
    assert!(
        a.expanded.is_empty() != b.expanded.is_empty(),
        "exactly one caller does the work"
    );
    assert!(first.verify("base").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_groups_run_in_parallel() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let nano = env.nano(&manifest, CountingSource::new(&env.blobs_dir())).await;

    let (base, camera) = tokio::join!(nano.decompress("base"), nano.decompress("camera"));
    assert_eq!(base.unwrap().expanded.len(), 3);
    assert_eq!(camera.unwrap().expanded, vec!["libcam.so"]);
}

#[tokio::test]
async fn callback_receives_result() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let nano = env.nano(&manifest, CountingSource::new(&env.blobs_dir())).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = nano.decompress_with_callback("camera", move |result| {
        tx.send(result).ok();
    });
    handle.await.unwrap();

    let report = rx.await.unwrap().unwrap();
    assert_eq!(report.expanded, vec!["libcam.so"]);

    let (tx, rx) = tokio::sync::oneshot::channel();
    nano.decompress_with_callback("video", move |result| {
        tx.send(result).ok();
    })
    .await
    .unwrap();
    assert!(matches!(
        rx.await.unwrap(),
        Err(Error::UnknownGroup { .. })
    ));
}

#[tokio::test]
async fn upgrade_moves_unchanged_files_and_reexpands_changed_ones() {
    let env = Env::new();
    let lib_x = content(21, 6000);
    let v1 = PackBuilder::default()
        .file("libnano_0.so", "base", "libX.so", &lib_x)
        .file("libnano_0.so", "base", "libY.so", &content(22, 800))
        .write(&env.root.path().join("blobs_v1"));
    let v1_nano = env
        .nano(&v1, CountingSource::new(&env.root.path().join("blobs_v1")))
        .await;
    v1_nano.decompress("base").await.unwrap();
    let old_dir = v1_nano.working_dir().unwrap();

    env.upgrade_package();
    // libX keeps its bytes but moves to another blob; libY changes
    let v2 = PackBuilder::default()
        .file("libnano_0.so", "base", "libY.so", &content(23, 900))
        .file("libnano_1.so", "base", "libX.so", &lib_x)
        .write(&env.root.path().join("blobs_v2"));
    let source = CountingSource::new(&env.root.path().join("blobs_v2"));
    let v2_nano = env.nano(&v2, source.clone()).await;

    let new_dir = v2_nano.working_dir().unwrap();
    assert_ne!(old_dir, new_dir);
    assert!(!old_dir.exists(), "previous working directory must be removed");
    assert_eq!(std::fs::read(new_dir.join("libX.so")).unwrap(), lib_x);
    assert!(!new_dir.join("libY.so").exists());
    assert!(!v2_nano.is_group_finished("base").await.unwrap());

    let report = v2_nano.decompress("base").await.unwrap();
    assert_eq!(report.expanded, vec!["libY.so"]);
    assert_eq!(source.opens("libnano_1.so"), 0, "libX must not be re-expanded");
    assert!(v2_nano.verify("base").await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let mut config = env.config();
    config.workers.max_workers = 0;
    let err = Nano::with_parts(
        config,
        &manifest,
        CountingSource::new(&env.blobs_dir()),
        env.prefs.clone(),
        MethodRegistry::with_defaults(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[tokio::test]
async fn new_persists_state_in_sqlite() {
    let env = Env::new();
    let manifest = two_blob_pack().write(&env.blobs_dir());
    let mut config = env.config();
    config.persistence.database_path = env.root.path().join("state").join("nano.db");

    let nano = Nano::new(
        config.clone(),
        &manifest,
        Arc::new(DirBlobSource::new(env.blobs_dir())),
    )
    .await
    .unwrap();
    nano.decompress("camera").await.unwrap();
    drop(nano);

    let reopened = Nano::new(config, &manifest, Arc::new(DirBlobSource::new(env.blobs_dir())))
        .await
        .unwrap();
    assert!(reopened.is_group_finished("camera").await.unwrap());
    assert!(!reopened.is_group_finished("base").await.unwrap());
}
