//! Custom test assertions for integration tests

use nanopack::integrity::check_value;
use nanopack::{Event, FileDescriptor};
use std::path::Path;
use std::time::Duration;

/// Assert every descriptor's file exists in `dir` with the expected size and check value
pub fn assert_files_verified(dir: &Path, descriptors: &[FileDescriptor]) {
    for d in descriptors {
        let path = dir.join(&d.name);
        let len = std::fs::metadata(&path)
            .unwrap_or_else(|e| panic!("{} missing: {e}", path.display()))
            .len();
        assert_eq!(len, d.file_size, "size mismatch for {}", d.name);
        assert_eq!(
            check_value(&path, 32 * 1024),
            d.check_value,
            "check value mismatch for {}",
            d.name
        );
    }
}

/// Collect events until one matches `predicate` or `timeout` elapses
///
/// The matching event is included as the last element.
pub async fn collect_events_until<F>(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    timeout: Duration,
    mut predicate: F,
) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let done = predicate(&event);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    collected
}
