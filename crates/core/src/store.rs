//! Disk access behind the `FileStore` capability
//!
//! The watcher never touches `std::fs` directly. Everything it needs from the
//! disk (listing a directory, statting one entry, reading content for a
//! fingerprint) goes through this trait, so tests can swap in a store that
//! fails on demand.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::hash::{self, ContentHash};

/// Metadata for one regular file inside a watched directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryMeta {
    /// File name relative to the directory
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time (None if the platform does not report it)
    pub modified: Option<SystemTime>,
}

/// Result of enumerating a directory
#[derive(Debug, Clone, Default)]
pub struct DirListing {
    /// Entries that were statted successfully
    pub entries: Vec<DirEntryMeta>,
    /// Names that were seen but could not be statted this time
    pub skipped: Vec<String>,
}

const WRITE_TEMP_SUFFIX: &str = ".tmp";

/// Temp name used by `LocalFileStore::write_all`: `.{name}.{uuid}.tmp`
fn write_temp_name(file_name: &str) -> String {
    format!(".{}.{}{}", file_name, uuid::Uuid::new_v4().simple(), WRITE_TEMP_SUFFIX)
}

/// Whether `name` is an in-flight temp file of an atomic `write_all`
///
/// These never describe user state, so listings and native notifications
/// leave them out.
pub fn is_write_temp(name: &str) -> bool {
    let Some(stem) = name
        .strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(WRITE_TEMP_SUFFIX))
    else {
        return false;
    };
    match stem.rsplit_once('.') {
        Some((target, id)) => {
            !target.is_empty()
                && id.len() == 32
                && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        }
        None => false,
    }
}

/// Disk capability required by the watch service
pub trait FileStore: Send + Sync + 'static {
    fn exists(&self, path: &Path) -> bool;

    fn is_directory(&self, path: &Path) -> bool;

    /// Resolve a path to its canonical absolute form
    fn canonicalize(&self, path: &Path) -> StoreResult<PathBuf>;

    /// List the regular files directly inside `dir`
    ///
    /// Fails with `NotFound`/`NotADirectory` when `dir` itself is gone.
    /// Per-entry failures land in `DirListing::skipped` instead.
    fn list_entries(&self, dir: &Path) -> StoreResult<DirListing>;

    /// Stat a single file; `Ok(None)` if it does not exist or is not a regular file
    fn entry(&self, path: &Path) -> StoreResult<Option<DirEntryMeta>>;

    fn read_all(&self, path: &Path) -> StoreResult<Vec<u8>>;

    fn write_all(&self, path: &Path, data: &[u8]) -> StoreResult<()>;

    /// Content hash of a file
    fn content_hash(&self, path: &Path) -> StoreResult<ContentHash> {
        Ok(hash::hash_bytes(&self.read_all(path)?))
    }
}

/// `FileStore` backed by the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }

    /// Create an empty file if it does not exist yet
    pub fn touch(&self, path: &Path) -> StoreResult<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(|_| ())
            .map_err(|e| StoreError::io(path, e))
    }

    pub fn create_dir_all(&self, path: &Path) -> StoreResult<()> {
        fs::create_dir_all(path).map_err(|e| StoreError::io(path, e))
    }

    pub fn remove_dir_all(&self, path: &Path) -> StoreResult<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Wipe a directory and recreate it empty
    pub fn delete_dir_then_mkdir(&self, path: &Path) -> StoreResult<()> {
        self.remove_dir_all(path)?;
        self.create_dir_all(path)
    }

    fn meta_from(name: String, metadata: &fs::Metadata) -> DirEntryMeta {
        DirEntryMeta {
            name,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

impl FileStore for LocalFileStore {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_directory(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn canonicalize(&self, path: &Path) -> StoreResult<PathBuf> {
        fs::canonicalize(path).map_err(|e| StoreError::io(path, e))
    }

    fn list_entries(&self, dir: &Path) -> StoreResult<DirListing> {
        let metadata = fs::metadata(dir).map_err(|e| StoreError::io(dir, e))?;
        if !metadata.is_dir() {
            return Err(StoreError::NotADirectory(dir.to_path_buf()));
        }

        let mut listing = DirListing::default();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // Entry raced away between readdir and stat
                    if let Some(name) = e.path().and_then(|p| p.file_name()) {
                        let name = name.to_string_lossy().into_owned();
                        if !is_write_temp(&name) {
                            listing.skipped.push(name);
                        }
                    }
                    debug!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if is_write_temp(&name) {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => listing.entries.push(Self::meta_from(name, &metadata)),
                Err(e) => {
                    debug!(dir = %dir.display(), name = %name, error = %e, "Skipping entry");
                    listing.skipped.push(name);
                }
            }
        }

        Ok(listing)
    }

    fn entry(&self, path: &Path) -> StoreResult<Option<DirEntryMeta>> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };

        if !metadata.is_file() {
            return Ok(None);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Some(Self::meta_from(name, &metadata)))
    }

    fn read_all(&self, path: &Path) -> StoreResult<Vec<u8>> {
        fs::read(path).map_err(|e| StoreError::io(path, e))
    }

    /// Atomic write
    ///
    /// Writes data to a temporary sibling file, fsyncs it, then renames it over
    /// the target so readers never observe a partially written file.
    fn write_all(&self, path: &Path, data: &[u8]) -> StoreResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::NotADirectory(path.to_path_buf()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = parent.join(write_temp_name(&file_name));

        let result = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::io(path, e));
        }
        Ok(())
    }

    fn content_hash(&self, path: &Path) -> StoreResult<ContentHash> {
        hash::hash_file(path)
    }
}
