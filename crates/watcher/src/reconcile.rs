//! Directory reconciliation scans
//!
//! Fingerprints the current on-disk state of a watched directory so it can be
//! diffed against the monitor's snapshot. The poll backend runs a full scan
//! every cycle; the native backend probes single names and falls back to a
//! full scan after an overflow. Everything here blocks on disk I/O and is
//! meant to run on the blocking pool.

use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

use dirwatch_core::{FileStore, Fingerprint, FingerprintPolicy, StoreResult};
use tracing::debug;

use crate::snapshot::ScanResult;

/// Fingerprint every regular file directly inside `dir`
///
/// `unsettled` holds the snapshot entries last seen while racy. Fails only
/// when the directory itself cannot be listed. Entries that vanish or cannot
/// be read mid-scan are recorded as skipped.
pub fn scan_directory(
    store: &dyn FileStore,
    dir: &Path,
    policy: &FingerprintPolicy,
    unsettled: &HashMap<String, Fingerprint>,
) -> StoreResult<ScanResult> {
    let listing = store.list_entries(dir)?;
    let now = SystemTime::now();

    let mut result = ScanResult::default();
    result.skipped.extend(listing.skipped);

    for meta in listing.entries {
        let path = dir.join(&meta.name);
        match policy.fingerprint(store, &path, &meta, now, unsettled.get(&meta.name)) {
            Ok(fingerprint) => {
                result.fingerprints.insert(meta.name, fingerprint);
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Fingerprint failed, retrying next cycle");
                result.skipped.insert(meta.name);
            }
        }
    }

    Ok(result)
}

/// Outcome of probing one name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Present(Fingerprint),
    Absent,
    /// Transient failure; try again later
    Skipped,
}

impl Probe {
    pub fn as_option(&self) -> Option<Option<Fingerprint>> {
        match self {
            Self::Present(fingerprint) => Some(Some(*fingerprint)),
            Self::Absent => Some(None),
            Self::Skipped => None,
        }
    }
}

/// Fingerprint a single name inside `dir`
pub fn probe_entry(
    store: &dyn FileStore,
    dir: &Path,
    name: &str,
    policy: &FingerprintPolicy,
    previous: Option<&Fingerprint>,
) -> Probe {
    let path = dir.join(name);
    let meta = match store.entry(&path) {
        Ok(Some(meta)) => meta,
        Ok(None) => return Probe::Absent,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Probe failed");
            return Probe::Skipped;
        }
    };

    match policy.fingerprint(store, &path, &meta, SystemTime::now(), previous) {
        Ok(fingerprint) => Probe::Present(fingerprint),
        // Deleted between stat and read
        Err(e) if e.is_gone() => Probe::Absent,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Probe fingerprint failed");
            Probe::Skipped
        }
    }
}
