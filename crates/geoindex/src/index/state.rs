//! In-memory index state.

use std::collections::BTreeMap;
use std::path::Path;

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::json::JsonBlob;
use crate::meta::Meta;
use crate::paths;
use crate::types::Entry;
use crate::walk::{self, Candidate};

/// A file may still be written to within this window after its mtime.
const RACY_WINDOW_NS: i64 = 1_000_000_000;

/// Size and modification time a file had when its hash was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Fingerprint {
    pub size: u64,
    pub mtime_ns: i64,
    pub hashed_at_ns: i64,
}

impl Fingerprint {
    /// Whether the stored hash still describes a file with `size` and
    /// `mtime_ns`. A hash taken within [`RACY_WINDOW_NS`] of the mtime is
    /// never trusted, since a same-size rewrite may share the timestamp.
    pub fn trusts(&self, size: u64, mtime_ns: Option<i64>) -> bool {
        mtime_ns == Some(self.mtime_ns)
            && size == self.size
            && self.mtime_ns.saturating_add(RACY_WINDOW_NS) <= self.hashed_at_ns
    }
}

/// Everything an index persists: entries, metadata records and settings.
///
/// Entries are kept in insertion order; a path lookup table is rebuilt after
/// every structural change and after loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexState {
    entries: Vec<Entry>,
    #[serde(skip)]
    lookup: FnvHashMap<String, usize>,
    pub(crate) meta: Vec<Meta>,
    pub(crate) attributes: BTreeMap<String, JsonBlob>,
    pub(crate) tag: Option<String>,
    pub(crate) last_sync: BTreeMap<String, i64>,
    pub(crate) passwords: Vec<String>,
    pub(crate) fingerprints: BTreeMap<String, Fingerprint>,
}

impl IndexState {
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.lookup.get(path).map(|slot| &self.entries[*slot])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lookup.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `path` itself followed by its descendants, in insertion order.
    pub fn subtree<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.path == path || paths::is_descendant(&entry.path, path))
    }

    pub fn meta_records(&self) -> &[Meta] {
        &self.meta
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn last_sync(&self, registry: &str) -> Option<i64> {
        self.last_sync.get(registry).copied()
    }

    pub fn attributes(&self) -> &BTreeMap<String, JsonBlob> {
        &self.attributes
    }

    pub fn has_passwords(&self) -> bool {
        !self.passwords.is_empty()
    }

    /// Hash of the file behind an indexed entry as it is on disk now.
    ///
    /// The stored hash is returned while the file still matches the
    /// fingerprint taken when it was hashed; otherwise the file is hashed
    /// again. The index itself is not updated.
    pub fn verified_hash(&self, path: &str, fs_path: &Path) -> Result<String> {
        let entry = self
            .entry(path)
            .ok_or_else(|| IndexError::NotFound(format!("{path} is not indexed")))?;
        if entry.is_dir() {
            return Ok(String::new());
        }
        let candidate = Candidate::stat(fs_path.to_path_buf(), path.to_string(), entry.depth)?;
        let trusted = !entry.hash.is_empty()
            && self
                .fingerprints
                .get(path)
                .is_some_and(|print| print.trusts(candidate.size, candidate.mtime_ns));
        if trusted {
            return Ok(entry.hash.clone());
        }
        let hash = walk::content_hash(&candidate)?;
        if hash != entry.hash {
            log::warn!(
                "indexed entry changed on disk path={path} stored={} current={hash}",
                entry.hash
            );
        }
        Ok(hash)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Replaces the entry with the same path in place, or appends it.
    pub(crate) fn upsert(&mut self, entry: Entry) {
        match self.lookup.get(&entry.path) {
            Some(slot) => self.entries[*slot] = entry,
            None => {
                self.lookup.insert(entry.path.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Removes every entry matching `predicate`; returns the removed paths.
    pub(crate) fn remove_where(&mut self, predicate: impl Fn(&Entry) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|entry| {
            let drop = predicate(entry);
            if drop {
                removed.push(entry.path.clone());
            }
            !drop
        });
        if !removed.is_empty() {
            self.rebuild_lookup();
        }
        removed
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    pub(crate) fn rebuild_lookup(&mut self) {
        self.lookup = self
            .entries
            .iter()
            .enumerate()
            .map(|(slot, entry)| (entry.path.clone(), slot))
            .collect();
    }
}
