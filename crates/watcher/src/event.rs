//! Change events and the watcher capability

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

/// Type of observed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// File appeared
    Created,
    /// File content or metadata changed
    Modified,
    /// File disappeared
    Deleted,
    /// Native backend dropped notifications; state is unknown, re-read if it matters
    OverflowUnknown,
    /// The watched directory itself is gone; no further events follow
    DirectoryRemoved,
}

impl ChangeKind {
    /// Directory-wide kinds carry no file name and bypass interest filters
    pub fn is_directory_wide(&self) -> bool {
        matches!(self, Self::OverflowUnknown | Self::DirectoryRemoved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::OverflowUnknown => "overflow",
            Self::DirectoryRemoved => "directory_removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed change inside a watched directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChangeEvent {
    directory: PathBuf,
    file_name: String,
    kind: ChangeKind,
    observed_at: SystemTime,
}

impl FileChangeEvent {
    pub fn new(directory: impl Into<PathBuf>, file_name: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            directory: directory.into(),
            file_name: file_name.into(),
            kind,
            observed_at: SystemTime::now(),
        }
    }

    /// Event that concerns the whole directory rather than one file
    pub fn directory_wide(directory: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self::new(directory, String::new(), kind)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File name relative to the directory (empty for directory-wide kinds)
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn observed_at(&self) -> SystemTime {
        self.observed_at
    }

    /// Absolute path of the changed file
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    pub(crate) fn with_kind(mut self, kind: ChangeKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for FileChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_directory_wide() {
            write!(f, "{} {}", self.kind, self.directory.display())
        } else {
            write!(f, "{} {}", self.kind, self.path().display())
        }
    }
}

/// Capability registered with a `WatchCenter`
///
/// `interest` must be cheap and side-effect free: it runs on the detection
/// loop once per event. `on_change` calls for one registration never overlap
/// and arrive in detection order.
pub trait FileWatcher: Send + Sync + 'static {
    /// Whether this watcher cares about `context` (a file name)
    fn interest(&self, context: &str) -> bool;

    /// Called for every event this watcher is interested in
    fn on_change(&self, event: &FileChangeEvent) -> anyhow::Result<()>;
}

/// Closure-based `FileWatcher`
pub struct FnWatcher<I, C>
where
    I: Fn(&str) -> bool + Send + Sync + 'static,
    C: Fn(&FileChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    interest: I,
    on_change: C,
}

impl<I, C> FnWatcher<I, C>
where
    I: Fn(&str) -> bool + Send + Sync + 'static,
    C: Fn(&FileChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    pub fn new(interest: I, on_change: C) -> Self {
        Self {
            interest,
            on_change,
        }
    }
}

impl<I, C> FileWatcher for FnWatcher<I, C>
where
    I: Fn(&str) -> bool + Send + Sync + 'static,
    C: Fn(&FileChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn interest(&self, context: &str) -> bool {
        (self.interest)(context)
    }

    fn on_change(&self, event: &FileChangeEvent) -> anyhow::Result<()> {
        (self.on_change)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_event_accessors() {
        let event = FileChangeEvent::new("/tmp/watched", "f", ChangeKind::Created);
        assert_eq!(event.directory(), Path::new("/tmp/watched"));
        assert_eq!(event.file_name(), "f");
        assert_eq!(event.kind(), ChangeKind::Created);
        assert_eq!(event.path(), PathBuf::from("/tmp/watched/f"));
        assert_eq!(event.to_string(), "created /tmp/watched/f");
    }

    #[test]
    fn test_directory_wide_events() {
        let event = FileChangeEvent::directory_wide("/tmp/watched", ChangeKind::OverflowUnknown);
        assert!(event.kind().is_directory_wide());
        assert_eq!(event.file_name(), "");
        assert_eq!(event.to_string(), "overflow /tmp/watched");

        assert!(ChangeKind::DirectoryRemoved.is_directory_wide());
        assert!(!ChangeKind::Modified.is_directory_wide());
    }

    #[test]
    fn test_fn_watcher_delegates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let watcher = FnWatcher::new(
            |name: &str| name == "f",
            move |_event: &FileChangeEvent| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        assert!(watcher.interest("f"));
        assert!(!watcher.interest("g"));
        watcher
            .on_change(&FileChangeEvent::new("/d", "f", ChangeKind::Modified))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
