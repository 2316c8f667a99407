//! Error types for the watch service

use std::path::PathBuf;

use dirwatch_core::StoreError;
use thiserror::Error;

/// Main error type for watch operations
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Invalid watch path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: &'static str },

    #[error("Watched directory was removed: {0}")]
    DirectoryRemoved(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Native watch error: {0}")]
    Native(#[from] notify::Error),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    pub(crate) fn invalid_path(path: impl Into<PathBuf>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }
}

/// Result type alias for watch operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// A watcher's `on_change` did not complete normally
///
/// Never propagated: the dispatcher logs it and moves on.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("watcher callback failed: {0:#}")]
    Failed(anyhow::Error),

    #[error("watcher callback panicked: {0}")]
    Panicked(String),
}

impl CallbackError {
    /// Build from a panic payload
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}
