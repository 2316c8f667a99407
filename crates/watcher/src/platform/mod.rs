//! Native notification subscription (inotify, FSEvents, ReadDirectoryChangesW)
//!
//! Wraps a `notify::RecommendedWatcher` on a single directory. The notify
//! callback runs on notify's own thread and only forwards raw signals into
//! the monitor task; all coalescing happens on the monitor side.

use std::path::Path;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::debounce::RawSignal;
use crate::error::Result;

/// Live OS subscription; dropping it releases the handle
pub struct NativeSubscription {
    _watcher: RecommendedWatcher,
}

impl NativeSubscription {
    /// Subscribe to non-recursive notifications for `dir`
    pub fn subscribe(dir: &Path) -> Result<(Self, mpsc::UnboundedReceiver<RawSignal>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = dir.to_path_buf();

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                let signal = match res {
                    Ok(event) if event.need_rescan() => {
                        warn!(dir = %watched.display(), "Native event queue overflowed");
                        RawSignal::Rescan
                    }
                    Ok(event) => {
                        if matches!(event.kind, notify::EventKind::Access(_)) {
                            return;
                        }
                        debug!(kind = ?event.kind, paths = ?event.paths, "Native event");
                        RawSignal::Paths(event.paths)
                    }
                    Err(e) => {
                        warn!(dir = %watched.display(), error = %e, "Native watch error");
                        RawSignal::Rescan
                    }
                };
                // Receiver gone means the monitor stopped
                let _ = tx.send(signal);
            },
        )?;

        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok((Self { _watcher: watcher }, rx))
    }
}
