//! The index of one root directory.
//!
//! An [`Index`] owns the entry set, metadata records and settings of a root.
//! State sits behind a `parking_lot::RwLock`:
//! - readers take a shared guard
//! - a mutation takes the upgradable guard for the whole call, works on a
//!   clone, persists the clone, then upgrades and swaps it in
//!
//! Mutations are therefore serialized against each other but not against
//! readers, and a failed mutation leaves memory and disk untouched.

mod entries;
mod persistence;
mod settings;
mod state;

use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard};

pub use state::IndexState;

use crate::config::{IndexConfig, IndexManifest, INDEX_FOLDER, STATE_FILE};
use crate::error::{IndexError, Result};
use crate::meta::MetaStore;
use crate::paths;

pub struct Index {
    root: PathBuf,
    index_dir: PathBuf,
    config: IndexConfig,
    manifest: IndexManifest,
    state: RwLock<IndexState>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("root", &self.root)
            .field("index_id", &self.manifest.index_id)
            .finish_non_exhaustive()
    }
}

impl Index {
    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Creates an empty index in `root` and returns its `.ddb` folder.
    pub fn init(root: impl AsRef<Path>) -> Result<PathBuf> {
        let root = root.as_ref();
        let metadata = fs::metadata(root).map_err(|error| IndexError::io(root, error))?;
        if !metadata.is_dir() {
            return Err(IndexError::io(root, io::Error::other("not a directory")));
        }
        let root = fs::canonicalize(root).map_err(|error| IndexError::io(root, error))?;
        let index_dir = root.join(INDEX_FOLDER);
        if index_dir.exists() {
            return Err(IndexError::Conflict(format!(
                "an index already exists in {}",
                root.display()
            )));
        }

        fs::create_dir(&index_dir).map_err(|error| IndexError::io(&index_dir, error))?;
        let created = IndexManifest::new().save(&index_dir).and_then(|()| {
            persistence::write_state(
                &index_dir.join(STATE_FILE),
                &IndexState::default(),
                IndexConfig::default().compression_level,
            )
        });
        if let Err(error) = created {
            let _ = fs::remove_dir_all(&index_dir);
            return Err(error);
        }

        log::info!("initialized index root={}", root.display());
        Ok(index_dir)
    }

    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(root, IndexConfig::default())
    }

    pub fn open_with(root: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).map_err(|error| {
            IndexError::Integrity(format!("cannot open index at {}: {error}", root.display()))
        })?;
        let index_dir = root.join(INDEX_FOLDER);
        if !index_dir.is_dir() {
            return Err(IndexError::Integrity(format!(
                "no index found in {}",
                root.display()
            )));
        }
        let manifest = IndexManifest::load(&index_dir)?;
        let state = persistence::read_state(&index_dir.join(STATE_FILE))?;
        log::debug!(
            "opened index root={} id={} entries={}",
            root.display(),
            manifest.index_id,
            state.len()
        );
        Ok(Self {
            root,
            index_dir,
            config,
            manifest,
            state: RwLock::new(state),
        })
    }

    /// Opens the index in `root`, creating it first when there is none.
    pub fn open_or_init(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.join(INDEX_FOLDER).exists() {
            Self::init(root)?;
        }
        Self::open(root)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `.ddb` folder.
    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// Resolves a root-relative or absolute path to an index path.
    pub fn resolve(&self, input: impl AsRef<Path>) -> Result<String> {
        paths::to_index_path(&self.root, input.as_ref())
    }

    pub fn fs_path(&self, index_path: &str) -> PathBuf {
        paths::to_fs_path(&self.root, index_path)
    }

    pub fn meta(&self) -> MetaStore<'_> {
        MetaStore::new(self)
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read()
    }

    /// Runs `apply` on a copy of the state and commits it when it succeeds.
    pub(crate) fn mutate<T>(&self, apply: impl FnOnce(&mut IndexState) -> Result<T>) -> Result<T> {
        let guard = self.state.upgradable_read();
        let mut next = guard.clone();
        let output = apply(&mut next)?;
        persistence::write_state(
            &self.index_dir.join(STATE_FILE),
            &next,
            self.config.compression_level,
        )?;
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        *guard = next;
        Ok(output)
    }

    /// Excludes every mutation until dropped; readers still proceed.
    ///
    /// Calling a mutating method of this index while holding the lease
    /// deadlocks.
    pub fn lease(&self) -> IndexLease<'_> {
        IndexLease {
            root: &self.root,
            index_dir: &self.index_dir,
            guard: self.state.upgradable_read(),
        }
    }

    /// A shared snapshot guard; mutations wait until it is dropped.
    pub fn read_lease(&self) -> ReadLease<'_> {
        ReadLease {
            root: &self.root,
            guard: self.state.read(),
        }
    }
}

/// Exclusive-against-writers view of an index. See [`Index::lease`].
pub struct IndexLease<'a> {
    root: &'a Path,
    index_dir: &'a Path,
    guard: RwLockUpgradableReadGuard<'a, IndexState>,
}

impl IndexLease<'_> {
    pub fn root(&self) -> &Path {
        self.root
    }

    pub fn index_dir(&self) -> &Path {
        self.index_dir
    }

    pub fn resolve(&self, input: impl AsRef<Path>) -> Result<String> {
        paths::to_index_path(self.root, input.as_ref())
    }

    pub fn fs_path(&self, index_path: &str) -> PathBuf {
        paths::to_fs_path(self.root, index_path)
    }
}

impl Deref for IndexLease<'_> {
    type Target = IndexState;

    fn deref(&self) -> &IndexState {
        &self.guard
    }
}

/// Shared view of an index. See [`Index::read_lease`].
pub struct ReadLease<'a> {
    root: &'a Path,
    guard: RwLockReadGuard<'a, IndexState>,
}

impl ReadLease<'_> {
    pub fn root(&self) -> &Path {
        self.root
    }

    pub fn resolve(&self, input: impl AsRef<Path>) -> Result<String> {
        paths::to_index_path(self.root, input.as_ref())
    }

    pub fn fs_path(&self, index_path: &str) -> PathBuf {
        paths::to_fs_path(self.root, index_path)
    }
}

impl Deref for ReadLease<'_> {
    type Target = IndexState;

    fn deref(&self) -> &IndexState {
        &self.guard
    }
}
