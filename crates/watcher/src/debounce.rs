//! Pending-name coalescing for the native backend
//!
//! Raw notifications for one file collapse into a single pending name. The
//! monitor probes each name once per coalescing window, so a storm of writes
//! to one file costs one probe and at most one event.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use dirwatch_core::is_write_temp;

/// Raw signal bridged from the notify thread
#[derive(Debug, Clone)]
pub enum RawSignal {
    /// Paths touched by one OS notification
    Paths(Vec<PathBuf>),
    /// The OS queue overflowed or the backend reported an error
    Rescan,
}

/// What a monitor must do at the end of a coalescing window
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PendingBatch {
    pub names: BTreeSet<String>,
    pub rescan: bool,
    /// The watched directory itself was touched (possibly removed)
    pub directory_touched: bool,
}

impl PendingBatch {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && !self.rescan && !self.directory_touched
    }
}

/// Accumulates raw signals for one directory
#[derive(Debug)]
pub struct PendingNames {
    directory: PathBuf,
    batch: PendingBatch,
}

impl PendingNames {
    pub fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
            batch: PendingBatch::default(),
        }
    }

    pub fn record(&mut self, signal: RawSignal) {
        match signal {
            RawSignal::Rescan => self.batch.rescan = true,
            RawSignal::Paths(paths) => {
                for path in paths {
                    self.record_path(&path);
                }
            }
        }
    }

    fn record_path(&mut self, path: &Path) {
        if path == self.directory {
            self.batch.directory_touched = true;
            return;
        }

        // Only direct children; the watch is non-recursive
        if path.parent() != Some(self.directory.as_path()) {
            return;
        }

        if let Some(name) = path.file_name() {
            let name = name.to_string_lossy().into_owned();
            if !is_write_temp(&name) {
                self.batch.names.insert(name);
            }
        }
    }

    /// Put back names that could not be probed this time
    pub fn retry<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.batch.names.extend(names);
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn take(&mut self) -> PendingBatch {
        std::mem::take(&mut self.batch)
    }
}
