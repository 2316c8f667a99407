//! Last-known directory state and snapshot diffing
//!
//! The snapshot is updated as soon as a difference is found, never after
//! dispatch. A file written several times between two cycles therefore
//! produces a single change describing only its final state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use dirwatch_core::Fingerprint;

use crate::event::ChangeKind;

/// Fingerprints gathered by one scan of a directory
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub fingerprints: BTreeMap<String, Fingerprint>,
    /// Names present on disk that could not be fingerprinted this time
    pub skipped: BTreeSet<String>,
}

/// One coalesced change produced by a diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub name: String,
    pub kind: ChangeKind,
}

/// File name -> fingerprint, owned by a single monitor
#[derive(Debug, Default)]
pub struct Snapshot {
    entries: HashMap<String, Fingerprint>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Baseline from a first scan; produces no changes
    pub fn from_scan(scan: ScanResult) -> Self {
        Self {
            entries: scan.fingerprints.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Fingerprint> {
        self.entries.get(name)
    }

    /// Entries last fingerprinted with a content hash, i.e. seen while racy
    pub fn unsettled(&self) -> HashMap<String, Fingerprint> {
        self.entries
            .iter()
            .filter(|(_, fingerprint)| fingerprint.content.is_some())
            .map(|(name, fingerprint)| (name.clone(), *fingerprint))
            .collect()
    }

    /// Diff a full scan against the snapshot, updating it in place
    ///
    /// Skipped names keep their previous fingerprint and are never reported
    /// as deleted. Changes come back ordered by name.
    pub fn apply_scan(&mut self, scan: &ScanResult) -> Vec<Change> {
        let mut changes = BTreeMap::new();

        for (name, fingerprint) in &scan.fingerprints {
            if let Some(kind) = self.apply_entry(name, Some(*fingerprint)) {
                changes.insert(name.clone(), kind);
            }
        }

        let vanished: Vec<String> = self
            .entries
            .keys()
            .filter(|name| !scan.fingerprints.contains_key(*name) && !scan.skipped.contains(*name))
            .cloned()
            .collect();
        for name in vanished {
            self.entries.remove(&name);
            changes.insert(name, ChangeKind::Deleted);
        }

        changes
            .into_iter()
            .map(|(name, kind)| Change { name, kind })
            .collect()
    }

    /// Diff a single probed entry (`None` = absent), updating the snapshot
    pub fn apply_entry(&mut self, name: &str, current: Option<Fingerprint>) -> Option<ChangeKind> {
        match (self.entries.get(name), current) {
            (None, None) => None,
            (Some(_), None) => {
                self.entries.remove(name);
                Some(ChangeKind::Deleted)
            }
            (None, Some(fingerprint)) => {
                self.entries.insert(name.to_string(), fingerprint);
                Some(ChangeKind::Created)
            }
            (Some(previous), Some(fingerprint)) => {
                let changed = previous.differs_from(&fingerprint);
                // Always keep the newest observation, including a fresh content hash
                self.entries.insert(name.to_string(), fingerprint);
                changed.then_some(ChangeKind::Modified)
            }
        }
    }
}
