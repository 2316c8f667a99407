//! Locating and loading the watch configuration

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use watcher::WatchConfig;

/// Default config location: `<config dir>/dirwatch/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dirwatch").join("config.toml"))
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    Defaults,
}

/// Load from an explicit path (which must exist) or the default location (which may not)
pub fn load(explicit: Option<&Path>) -> Result<(WatchConfig, Source)> {
    if let Some(path) = explicit {
        let config = WatchConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        return Ok((config, Source::File(path.to_path_buf())));
    }

    match default_config_path() {
        Some(path) if path.is_file() => {
            let config = WatchConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            Ok((config, Source::File(path)))
        }
        _ => Ok((WatchConfig::default(), Source::Defaults)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_ms = 250\nbackend = \"native\"\n").unwrap();

        let (config, source) = load(Some(&path)).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.backend, watcher::Backend::Native);
        assert_eq!(source, Source::File(path));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_ms = 1\n").unwrap();

        assert!(load(Some(&path)).is_err());
    }
}
