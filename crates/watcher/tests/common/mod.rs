//! Shared helpers for watch center integration tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dirwatch_core::{FileStore, LocalFileStore};
use parking_lot::Mutex;
use watcher::{ChangeKind, FileChangeEvent, FileWatcher, FnWatcher, WatchConfig};

/// Fast polling so tests settle quickly
pub fn fast_config() -> WatchConfig {
    WatchConfig {
        poll_interval_ms: 20,
        ..WatchConfig::default()
    }
}

/// Atomically replace `dir/name` with `content`
pub fn write(dir: &Path, name: &str, content: &str) {
    LocalFileStore::new()
        .write_all(&dir.join(name), content.as_bytes())
        .unwrap();
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// What a recording watcher saw: (kind, file name, content read at callback time)
pub type Seen = Arc<Mutex<Vec<(ChangeKind, String, Option<String>)>>>;

/// Watcher interested in exactly `name` that reads the file on every change
pub fn recorder(name: &'static str) -> (Arc<dyn FileWatcher>, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let watcher: Arc<dyn FileWatcher> = Arc::new(FnWatcher::new(
        move |file: &str| file == name,
        move |event: &FileChangeEvent| {
            let content = std::fs::read_to_string(event.path()).ok();
            log.lock()
                .push((event.kind(), event.file_name().to_string(), content));
            Ok(())
        },
    ));
    (watcher, seen)
}

pub fn contents(seen: &Seen) -> Vec<String> {
    seen.lock().iter().filter_map(|(_, _, c)| c.clone()).collect()
}

pub fn kinds(seen: &Seen) -> Vec<ChangeKind> {
    seen.lock().iter().map(|(kind, _, _)| *kind).collect()
}
