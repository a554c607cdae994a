//! Metadata records scoped to an entry or to the whole dataset.
//!
//! Records live in the index state in modification order: `add` appends,
//! `set` rewrites the newest record for its `(path, key)` and moves it to the
//! end, and `get` reads the newest.

use std::collections::BTreeMap;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::config::now_secs;
use crate::error::{IndexError, Result};
use crate::index::{Index, IndexState};
use crate::json::JsonBlob;

/// One metadata record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Meta {
    pub id: Uuid,
    pub data: JsonBlob,
    /// Index path the record is scoped to; empty for dataset-global records.
    #[serde(default)]
    pub path: String,
    pub key: String,
    pub mtime: i64,
}

impl Meta {
    pub fn is_global(&self) -> bool {
        self.path.is_empty()
    }
}

impl Serialize for Meta {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let skip_path = serializer.is_human_readable() && self.path.is_empty();
        let mut state = serializer.serialize_struct("Meta", if skip_path { 4 } else { 5 })?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("data", &self.data)?;
        if skip_path {
            state.skip_field("path")?;
        } else {
            state.serialize_field("path", &self.path)?;
        }
        state.serialize_field("key", &self.key)?;
        state.serialize_field("mtime", &self.mtime)?;
        state.end()
    }
}

/// Number of records sharing a key under one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaListItem {
    pub count: usize,
    pub key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
}

pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(IndexError::Validation(format!(
            "invalid metadata key {key:?}: use letters, digits, '_', '-' or '.'"
        )))
    }
}

// ---------------------------------------------------------------------------
// State-level operations
// ---------------------------------------------------------------------------

fn matches(meta: &Meta, path: &str, key: &str) -> bool {
    meta.path == path && meta.key == key
}

impl IndexState {
    pub(crate) fn meta_add(&mut self, path: &str, key: &str, data: JsonBlob) -> Meta {
        let record = Meta {
            id: Uuid::new_v4(),
            data,
            path: path.to_string(),
            key: key.to_string(),
            mtime: now_secs(),
        };
        self.meta.push(record.clone());
        record
    }

    pub(crate) fn meta_set(&mut self, path: &str, key: &str, data: JsonBlob) -> Meta {
        let newest = self.meta.iter().rposition(|meta| matches(meta, path, key));
        match newest {
            Some(slot) => {
                let mut record = self.meta.remove(slot);
                record.data = data;
                record.mtime = now_secs();
                self.meta.push(record.clone());
                record
            }
            None => self.meta_add(path, key, data),
        }
    }

    pub fn meta_get(&self, path: &str, key: &str) -> Option<&Meta> {
        self.meta.iter().rev().find(|meta| matches(meta, path, key))
    }

    pub(crate) fn meta_remove(&mut self, id: Uuid) -> usize {
        let before = self.meta.len();
        self.meta.retain(|meta| meta.id != id);
        before - self.meta.len()
    }

    pub(crate) fn meta_unset(&mut self, path: &str, key: &str) -> usize {
        let before = self.meta.len();
        self.meta.retain(|meta| !matches(meta, path, key));
        before - self.meta.len()
    }

    pub fn meta_list(&self, path: &str) -> Vec<MetaListItem> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for meta in self.meta.iter().filter(|meta| meta.path == path) {
            *counts.entry(meta.key.as_str()).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(key, count)| MetaListItem {
                count,
                key: key.to_string(),
                path: path.to_string(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Index view
// ---------------------------------------------------------------------------

/// Metadata operations of an [`Index`], obtained with [`Index::meta`].
///
/// `path` arguments are root-relative or absolute; an empty path addresses
/// dataset-global records.
#[derive(Clone, Copy)]
pub struct MetaStore<'a> {
    index: &'a Index,
}

impl<'a> MetaStore<'a> {
    pub(crate) fn new(index: &'a Index) -> Self {
        Self { index }
    }

    /// Resolves a scope path; non-global scopes must name an indexed entry.
    fn scope(&self, state: &IndexState, path: &str) -> Result<String> {
        if path.is_empty() {
            return Ok(String::new());
        }
        let resolved = self.index.resolve(path)?;
        if !resolved.is_empty() && !state.contains(&resolved) {
            return Err(IndexError::NotFound(format!("{path} is not indexed")));
        }
        Ok(resolved)
    }

    /// Appends a new record, even when records with the same key exist.
    pub fn add(&self, path: &str, key: &str, data: &Value) -> Result<Meta> {
        validate_key(key)?;
        let data = JsonBlob::from_value(data);
        self.index.mutate(|state| {
            let scope = self.scope(state, path)?;
            let record = state.meta_add(&scope, key, data);
            log::debug!("meta add id={} path={scope} key={key}", record.id);
            Ok(record)
        })
    }

    /// Replaces the newest record for `(path, key)`, creating one if absent.
    pub fn set(&self, path: &str, key: &str, data: &Value) -> Result<Meta> {
        validate_key(key)?;
        let data = JsonBlob::from_value(data);
        self.index.mutate(|state| {
            let scope = self.scope(state, path)?;
            let record = state.meta_set(&scope, key, data);
            log::debug!("meta set id={} path={scope} key={key}", record.id);
            Ok(record)
        })
    }

    /// The newest record for `(path, key)`.
    pub fn get(&self, path: &str, key: &str) -> Result<Option<Meta>> {
        validate_key(key)?;
        let state = self.index.read();
        let scope = self.scope(&state, path)?;
        Ok(state.meta_get(&scope, key).cloned())
    }

    /// Deletes one record by id; returns the number removed (0 or 1).
    pub fn remove(&self, id: &str) -> Result<usize> {
        let id = Uuid::parse_str(id.trim())
            .map_err(|error| IndexError::Validation(format!("invalid metadata id {id:?}: {error}")))?;
        if !self.index.read().meta.iter().any(|meta| meta.id == id) {
            return Ok(0);
        }
        self.index.mutate(|state| Ok(state.meta_remove(id)))
    }

    /// Deletes every record for `(path, key)`; returns the number removed.
    pub fn unset(&self, path: &str, key: &str) -> Result<usize> {
        validate_key(key)?;
        self.index.mutate(|state| {
            let scope = self.scope(state, path)?;
            let removed = state.meta_unset(&scope, key);
            log::debug!("meta unset path={scope} key={key} removed={removed}");
            Ok(removed)
        })
    }

    /// Distinct keys under `path` with their record counts, sorted by key.
    pub fn list(&self, path: &str) -> Result<Vec<MetaListItem>> {
        let state = self.index.read();
        let scope = self.scope(&state, path)?;
        Ok(state.meta_list(&scope))
    }
}
