//! Directory change watching for Dirwatch
//!
//! This crate multiplexes many logical watchers over one detection loop per
//! directory:
//! - Poll backend with snapshot diffing (bursts coalesce to the final state)
//! - Native backend on top of `notify`, with a short coalescing window
//! - Overflow recovery via full rescans
//! - Per-watcher serialized dispatch with failure isolation

pub mod center;
pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod monitor;
pub mod platform;
pub mod reconcile;
pub mod registry;
pub mod snapshot;

pub use center::WatchCenter;
pub use config::{Backend, WatchConfig};
pub use error::{CallbackError, Result, WatchError};
pub use event::{ChangeKind, FileChangeEvent, FileWatcher, FnWatcher};

pub use dirwatch_core::{FileStore, FingerprintMode, LocalFileStore};
