//! Index-level settings: attributes, tag and last-sync cursors.

use std::collections::BTreeMap;

use serde_json::Value;

use super::Index;
use crate::error::{IndexError, Result};
use crate::json::JsonBlob;

/// Registry slot used when no registry is named.
pub const DEFAULT_REGISTRY: &str = "";

impl Index {
    /// Merges `changes` into the index attributes and returns the full set.
    ///
    /// A `null` value deletes its key. An empty map only reads.
    pub fn change_attributes(
        &self,
        changes: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>> {
        if changes.is_empty() {
            return Ok(attribute_values(&self.read().attributes));
        }
        self.mutate(|state| {
            for (key, value) in changes {
                if key.trim().is_empty() {
                    return Err(IndexError::Validation("attribute key is empty".into()));
                }
                if value.is_null() {
                    state.attributes.remove(key);
                } else {
                    state
                        .attributes
                        .insert(key.clone(), JsonBlob::from_value(value));
                }
            }
            log::debug!("changed attributes keys={}", changes.len());
            Ok(attribute_values(&state.attributes))
        })
    }

    pub fn get_tag(&self) -> Option<String> {
        self.read().tag.clone()
    }

    pub fn set_tag(&self, tag: &str) -> Result<()> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(IndexError::Validation("tag must not be blank".into()));
        }
        self.mutate(|state| {
            state.tag = Some(tag.to_string());
            log::debug!("set tag={tag}");
            Ok(())
        })
    }

    /// Removes the tag; returns whether one was set.
    pub fn clear_tag(&self) -> Result<bool> {
        if self.read().tag.is_none() {
            return Ok(false);
        }
        self.mutate(|state| Ok(state.tag.take().is_some()))
    }

    /// Epoch seconds of the last sync with `registry` (default slot when
    /// `None`), or `None` if never synced.
    pub fn get_last_sync(&self, registry: Option<&str>) -> Option<i64> {
        self.read()
            .last_sync
            .get(registry.unwrap_or(DEFAULT_REGISTRY))
            .copied()
    }

    /// Records a sync time; `None` or `0` clears the cursor.
    pub fn set_last_sync(&self, registry: Option<&str>, time: Option<i64>) -> Result<()> {
        let registry = registry.unwrap_or(DEFAULT_REGISTRY).to_string();
        self.mutate(|state| {
            match time.filter(|time| *time != 0) {
                Some(time) => {
                    state.last_sync.insert(registry.clone(), time);
                }
                None => {
                    state.last_sync.remove(&registry);
                }
            }
            log::debug!("set last sync registry={registry:?} time={time:?}");
            Ok(())
        })
    }
}

fn attribute_values(attributes: &BTreeMap<String, JsonBlob>) -> BTreeMap<String, Value> {
    attributes
        .iter()
        .map(|(key, value)| (key.clone(), value.to_value()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open() -> (TempDir, Index) {
        let temp = TempDir::new().unwrap();
        let index = Index::open_or_init(temp.path()).unwrap();
        (temp, index)
    }

    #[test]
    fn attributes_merge_and_null_deletes() {
        let (_temp, index) = open();
        let first = BTreeMap::from([
            ("public".to_string(), json!(true)),
            ("name".to_string(), json!("survey")),
        ]);
        index.change_attributes(&first).unwrap();

        let second = BTreeMap::from([("public".to_string(), Value::Null)]);
        let all = index.change_attributes(&second).unwrap();
        assert_eq!(all, BTreeMap::from([("name".to_string(), json!("survey"))]));
        assert_eq!(index.change_attributes(&BTreeMap::new()).unwrap(), all);
    }

    #[test]
    fn tag_lifecycle() {
        let (temp, index) = open();
        assert_eq!(index.get_tag(), None);
        assert!(matches!(index.set_tag("  "), Err(IndexError::Validation(_))));
        index.set_tag("hub.example/org/ds").unwrap();
        assert_eq!(
            Index::open(temp.path()).unwrap().get_tag().as_deref(),
            Some("hub.example/org/ds")
        );
        assert!(index.clear_tag().unwrap());
        assert!(!index.clear_tag().unwrap());
    }

    #[test]
    fn last_sync_slots_are_independent() {
        let (_temp, index) = open();
        index.set_last_sync(None, Some(100)).unwrap();
        index.set_last_sync(Some("hub"), Some(200)).unwrap();
        assert_eq!(index.get_last_sync(None), Some(100));
        assert_eq!(index.get_last_sync(Some("")), Some(100));
        assert_eq!(index.get_last_sync(Some("hub")), Some(200));

        index.set_last_sync(Some("hub"), None).unwrap();
        assert_eq!(index.get_last_sync(Some("hub")), None);
        assert_eq!(index.get_last_sync(None), Some(100));
    }
}
