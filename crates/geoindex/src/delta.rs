//! Stamps and deltas between two indexes.
//!
//! A [`Stamp`] is the `path -> hash` view of an index in insertion order;
//! a [`Delta`] is the add/remove plan turning one stamp's entry set into
//! another's.

use std::fmt;
use std::path::Path;

use fnv::FnvHashMap;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{IndexError, Result};
use crate::index::Index;

/// One `path -> hash` pair; serialized as a single-key object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampEntry {
    pub path: String,
    /// Empty for directories.
    pub hash: String,
}

impl Serialize for StampEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.path, &self.hash)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for StampEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = StampEntry;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object with exactly one path")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<StampEntry, A::Error> {
                let (path, hash): (String, String) = map
                    .next_entry()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                if map.next_key::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(2, &self));
                }
                Ok(StampEntry { path, hash })
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

/// Snapshot of an index's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    /// BLAKE3 over the sorted `path\thash\n` lines.
    pub checksum: String,
    pub entries: Vec<StampEntry>,
    #[serde(default)]
    pub meta: Vec<Uuid>,
}

impl Stamp {
    pub fn new(entries: Vec<StampEntry>, meta: Vec<Uuid>) -> Self {
        Self {
            checksum: checksum(&entries),
            entries,
            meta,
        }
    }

    /// Applies removes, then adds.
    pub fn apply(&self, delta: &Delta) -> Stamp {
        let mut entries: Vec<StampEntry> = self
            .entries
            .iter()
            .filter(|entry| !delta.removes.iter().any(|remove| remove.path == entry.path))
            .cloned()
            .collect();
        for add in &delta.adds {
            match entries.iter_mut().find(|entry| entry.path == add.path) {
                Some(entry) => entry.hash = add.hash.clone(),
                None => entries.push(StampEntry {
                    path: add.path.clone(),
                    hash: add.hash.clone(),
                }),
            }
        }
        Stamp::new(entries, self.meta.clone())
    }

    /// Same `path -> hash` set, ignoring order.
    pub fn same_entries(&self, other: &Stamp) -> bool {
        self.checksum == other.checksum
    }
}

fn checksum(entries: &[StampEntry]) -> String {
    let mut lines: Vec<(&str, &str)> = entries
        .iter()
        .map(|entry| (entry.path.as_str(), entry.hash.as_str()))
        .collect();
    lines.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    for (path, hash) in lines {
        hasher.update(path.as_bytes());
        hasher.update(b"\t");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAction {
    pub path: String,
    pub hash: String,
}

impl AddAction {
    pub fn is_directory(&self) -> bool {
        self.hash.is_empty()
    }
}

impl fmt::Display for AddAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_directory() { 'D' } else { 'F' };
        write!(f, "ADD -> [{kind}] {}", self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveAction {
    pub path: String,
}

impl fmt::Display for RemoveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DEL -> {}", self.path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub adds: Vec<AddAction>,
    pub removes: Vec<RemoveAction>,
}

impl Delta {
    /// Computes the plan turning `source` into `target`.
    ///
    /// Adds follow target order, removes follow source order. A path whose
    /// kind changes between file and directory is removed and re-added.
    pub fn between(source: &Stamp, target: &Stamp) -> Delta {
        let source_hashes: FnvHashMap<&str, &str> = source
            .entries
            .iter()
            .map(|entry| (entry.path.as_str(), entry.hash.as_str()))
            .collect();
        let target_hashes: FnvHashMap<&str, &str> = target
            .entries
            .iter()
            .map(|entry| (entry.path.as_str(), entry.hash.as_str()))
            .collect();

        let removes = source
            .entries
            .iter()
            .filter(|entry| match target_hashes.get(entry.path.as_str()) {
                None => true,
                Some(hash) => hash.is_empty() != entry.hash.is_empty(),
            })
            .map(|entry| RemoveAction {
                path: entry.path.clone(),
            })
            .collect();

        let adds = target
            .entries
            .iter()
            .filter(|entry| source_hashes.get(entry.path.as_str()) != Some(&entry.hash.as_str()))
            .map(|entry| AddAction {
                path: entry.path.clone(),
                hash: entry.hash.clone(),
            })
            .collect();

        Delta { adds, removes }
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for remove in &self.removes {
            writeln!(f, "{remove}")?;
        }
        for add in &self.adds {
            writeln!(f, "{add}")?;
        }
        Ok(())
    }
}

impl Index {
    pub fn stamp(&self) -> Stamp {
        let state = self.read();
        let entries = state
            .entries()
            .iter()
            .map(|entry| StampEntry {
                path: entry.path.clone(),
                hash: entry.hash.clone(),
            })
            .collect();
        let meta = state.meta_records().iter().map(|meta| meta.id).collect();
        Stamp::new(entries, meta)
    }
}

/// Computes the delta between the indexes rooted at `source` and `target`.
pub fn delta(source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<Delta> {
    let open = |root: &Path, role: &str| {
        Index::open(root).map_err(|error| {
            IndexError::Integrity(format!(
                "cannot read {role} index {}: {error}",
                root.display()
            ))
        })
    };
    let source = open(source.as_ref(), "source")?;
    let target = open(target.as_ref(), "target")?;
    Ok(Delta::between(&source.stamp(), &target.stamp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stamp(pairs: &[(&str, &str)]) -> Stamp {
        Stamp::new(
            pairs
                .iter()
                .map(|(path, hash)| StampEntry {
                    path: path.to_string(),
                    hash: hash.to_string(),
                })
                .collect(),
            Vec::new(),
        )
    }

    #[test]
    fn changed_and_new_paths_are_added() {
        let source = stamp(&[("x", "h1")]);
        let target = stamp(&[("x", "h2"), ("y", "h3")]);
        let delta = Delta::between(&source, &target);
        assert_eq!(
            delta.adds,
            vec![
                AddAction { path: "x".into(), hash: "h2".into() },
                AddAction { path: "y".into(), hash: "h3".into() },
            ]
        );
        assert!(delta.removes.is_empty());
        assert!(source.apply(&delta).same_entries(&target));
    }

    #[test]
    fn identical_stamps_give_empty_delta() {
        let source = stamp(&[("d", ""), ("d/a", "h1")]);
        assert!(Delta::between(&source, &source).is_empty());
    }

    #[test]
    fn kind_change_is_remove_plus_add() {
        let source = stamp(&[("p", ""), ("gone", "h9")]);
        let target = stamp(&[("p", "h1")]);
        let delta = Delta::between(&source, &target);
        let removed: Vec<_> = delta.removes.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(removed, vec!["p", "gone"]);
        assert_eq!(delta.adds.len(), 1);
        assert!(source.apply(&delta).same_entries(&target));
    }

    #[test]
    fn display_matches_action_log_format() {
        let add_file = AddAction { path: "a.tif".into(), hash: "h".into() };
        let add_dir = AddAction { path: "b".into(), hash: String::new() };
        let remove = RemoveAction { path: "c".into() };
        assert_eq!(add_file.to_string(), "ADD -> [F] a.tif");
        assert_eq!(add_dir.to_string(), "ADD -> [D] b");
        assert_eq!(remove.to_string(), "DEL -> c");
    }

    #[test]
    fn stamp_entries_serialize_as_single_key_objects() {
        let stamp = stamp(&[("a.tif", "h1"), ("b", "")]);
        let value = serde_json::to_value(&stamp).unwrap();
        assert_eq!(value["entries"], json!([{"a.tif": "h1"}, {"b": ""}]));
        let restored: Stamp = serde_json::from_value(value).unwrap();
        assert_eq!(restored, stamp);
        assert!(serde_json::from_value::<StampEntry>(json!({"a": "1", "b": "2"})).is_err());
    }

    #[test]
    fn checksum_ignores_order() {
        let one = stamp(&[("a", "1"), ("b", "2")]);
        let two = stamp(&[("b", "2"), ("a", "1")]);
        assert_eq!(one.checksum, two.checksum);
        assert_ne!(one.checksum, stamp(&[("a", "1")]).checksum);
    }
}
