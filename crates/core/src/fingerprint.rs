//! Change-detection fingerprints
//!
//! A fingerprint is a cheap summary of a file's state (size + mtime). Files
//! whose mtime is too close to the scan time are "racy": two writes landing in
//! the same timestamp tick would look identical, so those also carry a BLAKE3
//! content hash until they settle.

use std::path::Path;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::hash::ContentHash;
use crate::store::{DirEntryMeta, FileStore};

/// Default window in which an mtime is considered untrustworthy
pub const DEFAULT_RACY_WINDOW: Duration = Duration::from_secs(2);

/// How fingerprints are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Size + mtime, content hash only for racy entries
    #[default]
    Metadata,
    /// Always hash content
    Content,
}

/// Comparable summary of one file's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub content: Option<ContentHash>,
}

impl Fingerprint {
    pub fn from_meta(meta: &DirEntryMeta) -> Self {
        Self {
            size: meta.size,
            modified: meta.modified,
            content: None,
        }
    }

    pub fn with_content(mut self, hash: ContentHash) -> Self {
        self.content = Some(hash);
        self
    }

    /// Whether `other` describes a different file state
    ///
    /// Content hashes are only compared when both sides carry one, so a file
    /// that stops being racy does not register as a change.
    pub fn differs_from(&self, other: &Fingerprint) -> bool {
        if self.size != other.size || self.modified != other.modified {
            return true;
        }
        match (self.content, other.content) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        }
    }
}

/// Rules for turning entry metadata into a fingerprint
#[derive(Debug, Clone, Copy)]
pub struct FingerprintPolicy {
    pub mode: FingerprintMode,
    pub racy_window: Duration,
}

impl Default for FingerprintPolicy {
    fn default() -> Self {
        Self {
            mode: FingerprintMode::Metadata,
            racy_window: DEFAULT_RACY_WINDOW,
        }
    }
}

impl FingerprintPolicy {
    pub fn new(mode: FingerprintMode, racy_window: Duration) -> Self {
        Self { mode, racy_window }
    }

    /// Whether an entry's mtime is too recent to trust on its own
    pub fn is_racy(&self, meta: &DirEntryMeta, now: SystemTime) -> bool {
        match meta.modified {
            // A missing mtime is never trustworthy
            None => true,
            // mtime in the future counts as racy too
            Some(modified) => match now.duration_since(modified) {
                Ok(age) => age < self.racy_window,
                Err(_) => true,
            },
        }
    }

    pub fn needs_content(&self, meta: &DirEntryMeta, now: SystemTime) -> bool {
        match self.mode {
            FingerprintMode::Content => true,
            FingerprintMode::Metadata => self.is_racy(meta, now),
        }
    }

    /// Compute the fingerprint of `path`, whose metadata is `meta`
    ///
    /// `previous` is the last fingerprint recorded for the same name. If it
    /// was taken while the entry was racy and the metadata has not moved
    /// since, a write may have landed in the same timestamp tick; the content
    /// is hashed once more to settle it.
    pub fn fingerprint(
        &self,
        store: &dyn FileStore,
        path: &Path,
        meta: &DirEntryMeta,
        now: SystemTime,
        previous: Option<&Fingerprint>,
    ) -> StoreResult<Fingerprint> {
        let fingerprint = Fingerprint::from_meta(meta);
        if self.needs_content(meta, now) {
            return Ok(fingerprint.with_content(store.content_hash(path)?));
        }

        let unsettled = previous
            .filter(|p| p.size == meta.size && p.modified == meta.modified)
            .and_then(|p| p.content);
        match unsettled {
            Some(seen) => {
                let current = store.content_hash(path)?;
                if current == seen {
                    // Settled: drop the hash so later cycles stay metadata-only
                    Ok(fingerprint)
                } else {
                    Ok(fingerprint.with_content(current))
                }
            }
            None => Ok(fingerprint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::store::LocalFileStore;
    use filetime::{set_file_mtime, FileTime};

    fn meta(size: u64, modified: Option<SystemTime>) -> DirEntryMeta {
        DirEntryMeta {
            name: "f".to_string(),
            size,
            modified,
        }
    }

    #[test]
    fn test_size_or_mtime_change_differs() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let base = Fingerprint::from_meta(&meta(3, Some(t0)));

        assert!(!base.differs_from(&base));
        assert!(base.differs_from(&Fingerprint::from_meta(&meta(4, Some(t0)))));
        assert!(base.differs_from(&Fingerprint::from_meta(&meta(
            3,
            Some(t0 + Duration::from_millis(1))
        ))));
    }

    #[test]
    fn test_content_only_compared_when_both_present() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let plain = Fingerprint::from_meta(&meta(1, Some(t0)));
        let b = plain.with_content(hash_bytes(b"b"));
        let c = plain.with_content(hash_bytes(b"c"));

        // Same tick, same size, different bytes
        assert!(b.differs_from(&c));
        // Settling from racy to plain is not a change
        assert!(!b.differs_from(&plain));
        assert!(!plain.differs_from(&b));
    }

    #[test]
    fn test_racy_window() {
        let policy = FingerprintPolicy::default();
        let now = SystemTime::now();

        assert!(policy.is_racy(&meta(1, Some(now)), now));
        assert!(policy.is_racy(&meta(1, None), now));
        assert!(policy.is_racy(&meta(1, Some(now + Duration::from_secs(60))), now));
        assert!(!policy.is_racy(&meta(1, Some(now - Duration::from_secs(60))), now));
    }

    #[test]
    fn test_content_mode_always_hashes() {
        let policy = FingerprintPolicy::new(FingerprintMode::Content, Duration::ZERO);
        let old = SystemTime::now() - Duration::from_secs(3_600);
        assert!(policy.needs_content(&meta(1, Some(old)), SystemTime::now()));
    }

    #[test]
    fn test_fingerprint_settled_file_skips_hash() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new();
        let file = temp_dir.path().join("old");
        std::fs::write(&file, b"old").unwrap();

        let an_hour_ago = SystemTime::now() - Duration::from_secs(3_600);
        set_file_mtime(&file, FileTime::from_system_time(an_hour_ago)).unwrap();

        let entry = store.entry(&file).unwrap().unwrap();
        let fp = FingerprintPolicy::default()
            .fingerprint(&store, &file, &entry, SystemTime::now(), None)
            .unwrap();

        assert_eq!(fp.size, 3);
        assert_eq!(fp.content, None);
    }

    #[test]
    fn test_fingerprint_fresh_file_is_hashed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new();
        let file = temp_dir.path().join("fresh");
        std::fs::write(&file, b"fresh").unwrap();

        let entry = store.entry(&file).unwrap().unwrap();
        let fp = FingerprintPolicy::default()
            .fingerprint(&store, &file, &entry, SystemTime::now(), None)
            .unwrap();

        assert_eq!(fp.content, Some(hash_bytes(b"fresh")));
    }

    #[test]
    fn test_same_tick_write_caught_after_settling() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new();
        let file = temp_dir.path().join("f");
        let policy = FingerprintPolicy::default();

        let tick = SystemTime::now() - Duration::from_millis(1_500);
        std::fs::write(&file, b"b").unwrap();
        set_file_mtime(&file, FileTime::from_system_time(tick)).unwrap();
        let entry = store.entry(&file).unwrap().unwrap();
        let first = policy.fingerprint(&store, &file, &entry, SystemTime::now(), None).unwrap();
        assert!(first.content.is_some());

        // Same size, same mtime, seen only once the racy window has passed
        std::fs::write(&file, b"c").unwrap();
        set_file_mtime(&file, FileTime::from_system_time(tick)).unwrap();
        let entry = store.entry(&file).unwrap().unwrap();
        let later = tick + Duration::from_secs(3);
        let second = policy.fingerprint(&store, &file, &entry, later, Some(&first)).unwrap();
        assert!(first.differs_from(&second));
        assert_eq!(second.content, Some(hash_bytes(b"c")));

        // Unchanged on the next look: hash dropped, no change reported
        let third = policy.fingerprint(&store, &file, &entry, later, Some(&second)).unwrap();
        assert_eq!(third.content, None);
        assert!(!second.differs_from(&third));
        let fourth = policy.fingerprint(&store, &file, &entry, later, Some(&third)).unwrap();
        assert_eq!(fourth, third);
    }
}
