//! Index configuration and the on-disk manifest.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::available_parallelism;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IndexError, Result};

/// Name of the folder that holds an index inside its root.
pub const INDEX_FOLDER: &str = ".ddb";
/// Compressed index state inside [`INDEX_FOLDER`].
pub const STATE_FILE: &str = "index.bin.zst";
/// Manifest inside [`INDEX_FOLDER`].
pub const MANIFEST_FILE: &str = "config.json";
/// Default artifact build destination inside [`INDEX_FOLDER`].
pub const BUILD_FOLDER: &str = "build";

/// Format version of both the manifest and the state file.
/// Version 1: postcard + zstd state with entries, meta, settings and passwords.
/// Version 2: adds per-file hash fingerprints.
pub const INDEX_FORMAT_VERSION: u32 = 2;

/// Runtime knobs for an open index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// zstd level used when writing the state file.
    pub compression_level: i32,
    /// Threads used for hashing; `None` uses available parallelism.
    pub hash_threads: Option<usize>,
    /// Keep a stored hash when a re-added file still has the size and
    /// nanosecond mtime it was hashed with, and was not hashed within the
    /// same second it was last written.
    pub reuse_unchanged_hashes: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            compression_level: 6,
            hash_threads: None,
            reuse_unchanged_hashes: true,
        }
    }
}

impl IndexConfig {
    pub fn effective_hash_threads(&self) -> usize {
        self.hash_threads
            .filter(|threads| *threads > 0)
            .unwrap_or_else(|| available_parallelism().map(|n| n.get()).unwrap_or(4))
    }
}

/// Identity of an index, stored as `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub index_id: Uuid,
    pub created_at: i64,
}

impl IndexManifest {
    pub fn new() -> Self {
        Self {
            version: INDEX_FORMAT_VERSION,
            index_id: Uuid::new_v4(),
            created_at: now_secs(),
        }
    }

    pub fn path(index_dir: &Path) -> PathBuf {
        index_dir.join(MANIFEST_FILE)
    }

    pub fn load(index_dir: &Path) -> Result<Self> {
        let path = Self::path(index_dir);
        let text = fs::read_to_string(&path).map_err(|error| {
            IndexError::Integrity(format!(
                "failed to read index manifest {}: {error}",
                path.display()
            ))
        })?;
        let manifest: Self = serde_json::from_str(&text).map_err(|error| {
            IndexError::Integrity(format!(
                "failed to parse index manifest {}: {error}",
                path.display()
            ))
        })?;
        if manifest.version != INDEX_FORMAT_VERSION {
            return Err(IndexError::Integrity(format!(
                "unsupported index version {} (expected {INDEX_FORMAT_VERSION})",
                manifest.version
            )));
        }
        Ok(manifest)
    }

    pub fn save(&self, index_dir: &Path) -> Result<()> {
        let path = Self::path(index_dir);
        let payload = serde_json::to_vec_pretty(self).map_err(|error| {
            IndexError::Integrity(format!("failed to serialize index manifest: {error}"))
        })?;
        fs::write(&path, payload).map_err(|error| IndexError::io(&path, error))
    }
}

impl Default for IndexManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time as epoch seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current time as epoch nanoseconds.
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn manifest_round_trips_through_json() {
        let temp = TempDir::new().unwrap();
        let manifest = IndexManifest::new();
        manifest.save(temp.path()).unwrap();
        assert_eq!(IndexManifest::load(temp.path()).unwrap(), manifest);
    }

    #[test]
    fn manifest_version_mismatch_is_integrity_error() {
        let temp = TempDir::new().unwrap();
        let mut manifest = IndexManifest::new();
        manifest.version = INDEX_FORMAT_VERSION + 1;
        manifest.save(temp.path()).unwrap();
        let error = IndexManifest::load(temp.path()).unwrap_err();
        assert!(matches!(error, IndexError::Integrity(_)));
    }

    #[test]
    fn zero_hash_threads_falls_back() {
        let config = IndexConfig {
            hash_threads: Some(0),
            ..IndexConfig::default()
        };
        assert!(config.effective_hash_threads() >= 1);
    }
}
