//! Dirwatch Core - disk primitives for the directory watch service
//!
//! This crate provides the foundational layer the watcher builds on:
//! - The `FileStore` capability (listing, reading, atomic writing)
//! - BLAKE3 content hashing
//! - Change-detection fingerprints

pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod store;

// Re-export main types for convenience
pub use error::{StoreError, StoreResult};
pub use fingerprint::{Fingerprint, FingerprintMode, FingerprintPolicy};
pub use hash::ContentHash;
pub use store::{is_write_temp, DirEntryMeta, DirListing, FileStore, LocalFileStore};
