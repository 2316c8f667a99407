//! Watch service configuration
//!
//! Loaded from TOML; every field has a default so a partial file (or none at
//! all) is valid.

use std::path::Path;
use std::time::Duration;

use dirwatch_core::{FingerprintMode, FingerprintPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchError};

/// Detection backend for directory monitors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Periodic snapshot diff (portable)
    #[default]
    Poll,
    /// OS notifications via `notify`, falling back to polling if unavailable
    Native,
}

/// Configuration for a `WatchCenter`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub backend: Backend,
    /// Interval between poll cycles
    pub poll_interval_ms: u64,
    /// Native backend: how long to gather notifications before probing
    pub coalesce_window_ms: u64,
    pub fingerprint: FingerprintMode,
    /// Entries modified more recently than this are content-hashed
    pub racy_window_ms: u64,
    /// How long a monitor with no watchers stays alive (0 = tear down at once)
    pub idle_grace_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Poll,
            poll_interval_ms: 100,
            coalesce_window_ms: 50,
            fingerprint: FingerprintMode::Metadata,
            racy_window_ms: 2_000,
            idle_grace_ms: 0,
        }
    }
}

/// Valid ranges, shown by `dw config`
pub const POLL_INTERVAL_RANGE: (u64, u64) = (10, 60_000);
pub const COALESCE_WINDOW_RANGE: (u64, u64) = (0, 10_000);
pub const RACY_WINDOW_RANGE: (u64, u64) = (0, 60_000);
pub const IDLE_GRACE_RANGE: (u64, u64) = (0, 3_600_000);

impl WatchConfig {
    /// Parse from a TOML string and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: WatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Check every value against its valid range
    pub fn validate(&self) -> Result<()> {
        check_range("poll_interval_ms", self.poll_interval_ms, POLL_INTERVAL_RANGE)?;
        check_range("coalesce_window_ms", self.coalesce_window_ms, COALESCE_WINDOW_RANGE)?;
        check_range("racy_window_ms", self.racy_window_ms, RACY_WINDOW_RANGE)?;
        check_range("idle_grace_ms", self.idle_grace_ms, IDLE_GRACE_RANGE)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }

    pub fn fingerprint_policy(&self) -> FingerprintPolicy {
        FingerprintPolicy::new(self.fingerprint, Duration::from_millis(self.racy_window_ms))
    }
}

fn check_range(key: &str, value: u64, (min, max): (u64, u64)) -> Result<()> {
    if value < min || value > max {
        return Err(WatchError::Config(format!(
            "{} must be between {} and {} (got {})",
            key, min, max, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, Backend::Poll);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.idle_grace(), Duration::ZERO);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = WatchConfig::from_toml_str(
            r#"
            backend = "native"
            poll_interval_ms = 250
            fingerprint = "content"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, Backend::Native);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.fingerprint, FingerprintMode::Content);
        assert_eq!(config.coalesce_window_ms, 50);
        assert_eq!(config.fingerprint_policy().mode, FingerprintMode::Content);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(WatchConfig::from_toml_str("").unwrap(), WatchConfig::default());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = WatchConfig::from_toml_str("poll_interval_ms = 1").unwrap_err();
        assert!(matches!(err, WatchError::Config(_)));
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = WatchConfig::from_toml_str(r#"backend = "inotify""#).unwrap_err();
        assert!(matches!(err, WatchError::ConfigParse(_)));
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        let config = WatchConfig {
            idle_grace_ms: 500,
            ..WatchConfig::default()
        };
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(WatchConfig::load(&path).unwrap(), config);
    }
}
