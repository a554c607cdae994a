//! Entry operations: add, remove, list and move.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use fnv::FnvHashSet;

use super::state::Fingerprint;
use super::Index;
use crate::config::now_nanos;
use crate::error::{IndexError, Result};
use crate::paths;
use crate::types::{path_depth, AddOptions, Entry, ListOptions};
use crate::walk::{self, Candidate, HashPlan, Walker};

impl Index {
    /// Adds files and directories to the index.
    ///
    /// Missing parent directories are added too. Returns every inserted or
    /// updated entry sorted by path.
    pub fn add<P: AsRef<Path>>(&self, inputs: &[P], options: AddOptions) -> Result<Vec<Entry>> {
        if inputs.is_empty() {
            return Err(IndexError::Validation("no paths to add".into()));
        }

        self.mutate(|state| {
            let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();

            for input in inputs {
                let input = input.as_ref();
                let path = self.resolve(input)?;
                let fs_path = self.fs_path(&path);
                let candidate = Candidate::stat(fs_path, path.clone(), path_depth(&path))?;

                if candidate.is_dir && options.recursive {
                    let mut walker = Walker::new(0, true);
                    let mut found = Vec::new();
                    walker.walk(&candidate, &|_| 0, &mut found)?;
                    for mut child in found {
                        child.depth = path_depth(&child.path);
                        candidates.insert(child.path.clone(), child);
                    }
                } else if path.is_empty() {
                    return Err(IndexError::Validation(
                        "adding the index root requires recursion".into(),
                    ));
                }
                if !path.is_empty() {
                    candidates.insert(path, candidate);
                }
            }

            let mut parents = BTreeSet::new();
            for path in candidates.keys() {
                for ancestor in paths::ancestors(path) {
                    if !state.contains(ancestor) && !candidates.contains_key(ancestor) {
                        parents.insert(ancestor.to_string());
                    }
                }
            }
            for parent in parents {
                let candidate =
                    Candidate::stat(self.fs_path(&parent), parent.clone(), path_depth(&parent))?;
                candidates.insert(parent, candidate);
            }

            let ordered: Vec<Candidate> = candidates.into_values().collect();
            let reuse = self.config.reuse_unchanged_hashes;
            let trusted = |candidate: &Candidate| {
                !candidate.is_dir
                    && state
                        .fingerprints
                        .get(&candidate.path)
                        .is_some_and(|print| print.trusts(candidate.size, candidate.mtime_ns))
            };
            let hashing_started = now_nanos();
            let described = walk::describe_all(
                &ordered,
                self.config.effective_hash_threads(),
                |candidate| {
                    let stored = state
                        .entry(&candidate.path)
                        .map(|previous| previous.hash.as_str())
                        .filter(|hash| !hash.is_empty());
                    match stored {
                        Some(hash) if reuse && trusted(candidate) => {
                            HashPlan::Reuse(hash.to_string())
                        }
                        _ => HashPlan::Compute,
                    }
                },
            );
            let entries = described.into_iter().collect::<Result<Vec<Entry>>>()?;

            let mut prints = Vec::new();
            for candidate in &ordered {
                match candidate.mtime_ns {
                    Some(_) if trusted(candidate) => {}
                    Some(mtime_ns) if !candidate.is_dir => prints.push((
                        candidate.path.clone(),
                        Some(Fingerprint {
                            size: candidate.size,
                            mtime_ns,
                            hashed_at_ns: hashing_started,
                        }),
                    )),
                    _ => prints.push((candidate.path.clone(), None)),
                }
            }
            for (path, print) in prints {
                match print {
                    Some(print) => state.fingerprints.insert(path, print),
                    None => state.fingerprints.remove(&path),
                };
            }
            for entry in &entries {
                state.upsert(entry.clone());
            }
            log::debug!(
                "added entries count={} root={}",
                entries.len(),
                self.root.display()
            );
            Ok(entries)
        })
    }

    /// Removes entries and their descendants from the index, together with
    /// the metadata records scoped to them. The filesystem is not touched.
    ///
    /// Returns the removed paths in index order.
    pub fn remove<P: AsRef<Path>>(&self, inputs: &[P]) -> Result<Vec<String>> {
        if inputs.is_empty() {
            return Err(IndexError::Validation("no paths to remove".into()));
        }
        let targets = inputs
            .iter()
            .map(|input| self.resolve(input))
            .collect::<Result<Vec<_>>>()?;

        self.mutate(|state| {
            for target in &targets {
                if !target.is_empty() && !state.contains(target) {
                    return Err(IndexError::NotFound(format!("{target} is not indexed")));
                }
            }
            let removed = state.remove_where(|entry| {
                targets.iter().any(|target| {
                    entry.path == *target || paths::is_descendant(&entry.path, target)
                })
            });
            let gone: FnvHashSet<&str> = removed.iter().map(String::as_str).collect();
            state
                .meta
                .retain(|meta| meta.path.is_empty() || !gone.contains(meta.path.as_str()));
            state
                .fingerprints
                .retain(|path, _| !gone.contains(path.as_str()));
            log::debug!("removed entries count={}", removed.len());
            Ok(removed)
        })
    }

    /// Lists indexed entries.
    ///
    /// An empty `inputs` lists the root. A file yields its own entry; a
    /// directory yields its children, or its descendants when recursive,
    /// limited to `max_depth` levels below it (`0` is unlimited).
    pub fn list<P: AsRef<Path>>(&self, inputs: &[P], options: ListOptions) -> Result<Vec<Entry>> {
        if options.max_depth < 0 {
            return Err(IndexError::Validation(format!(
                "max depth must not be negative, got {}",
                options.max_depth
            )));
        }
        let max_depth = options.max_depth as u32;
        let mut targets = inputs
            .iter()
            .map(|input| self.resolve(input))
            .collect::<Result<Vec<_>>>()?;
        if targets.is_empty() {
            targets.push(String::new());
        }

        let state = self.read();
        let mut listed: BTreeMap<&str, &Entry> = BTreeMap::new();
        for target in &targets {
            let is_dir = if target.is_empty() {
                true
            } else {
                let entry = state
                    .entry(target)
                    .ok_or_else(|| IndexError::NotFound(format!("{target} is not indexed")))?;
                if !entry.is_dir() {
                    listed.insert(entry.path.as_str(), entry);
                }
                entry.is_dir()
            };
            if !is_dir {
                continue;
            }
            for entry in state.entries() {
                if !paths::is_descendant(&entry.path, target) {
                    continue;
                }
                let depth = paths::relative_depth(&entry.path, target);
                let within = if options.recursive {
                    max_depth == 0 || depth <= max_depth
                } else {
                    depth == 1
                };
                if within {
                    listed.insert(entry.path.as_str(), entry);
                }
            }
        }
        Ok(listed.into_values().cloned().collect())
    }

    /// Renames an entry in the index only; descendants and scoped metadata
    /// follow it. Missing parents of `dest` are created as directories.
    ///
    /// Checked in order: the source must be indexed, `dest` must be free,
    /// must not lie inside the source, and must not lie below an indexed
    /// file.
    pub fn move_entry(&self, source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
        let source = self.resolve(source)?;
        let dest = self.resolve(dest)?;
        if source.is_empty() || dest.is_empty() {
            return Err(IndexError::Validation("cannot move the index root".into()));
        }

        self.mutate(|state| {
            if !state.contains(&source) {
                return Err(IndexError::NotFound(format!("{source} is not indexed")));
            }
            if source == dest || state.contains(&dest) {
                return Err(IndexError::Conflict(format!("{dest} already exists")));
            }
            if paths::is_descendant(&dest, &source) {
                return Err(IndexError::Validation(format!(
                    "cannot move {source} into itself"
                )));
            }
            if let Some(file) = paths::ancestors(&dest)
                .filter_map(|ancestor| state.entry(ancestor))
                .find(|ancestor| !ancestor.is_dir())
            {
                return Err(IndexError::Validation(format!(
                    "cannot move {source} below file {}",
                    file.path
                )));
            }

            let mut moved = 0usize;
            for entry in state.entries_mut() {
                if entry.path == source || paths::is_descendant(&entry.path, &source) {
                    entry.path = paths::rebase(&entry.path, &source, &dest);
                    entry.depth = path_depth(&entry.path);
                    moved += 1;
                }
            }
            state.rebuild_lookup();

            let missing: Vec<String> = paths::ancestors(&dest)
                .filter(|ancestor| !state.contains(ancestor))
                .map(str::to_string)
                .collect();
            for parent in missing.into_iter().rev() {
                state.upsert(Entry::directory(parent, None));
            }

            for meta in &mut state.meta {
                if meta.path == source || paths::is_descendant(&meta.path, &source) {
                    meta.path = paths::rebase(&meta.path, &source, &dest);
                }
            }
            let moved_prints: Vec<String> = state
                .fingerprints
                .keys()
                .filter(|path| **path == source || paths::is_descendant(path, &source))
                .cloned()
                .collect();
            for path in moved_prints {
                if let Some(print) = state.fingerprints.remove(&path) {
                    state
                        .fingerprints
                        .insert(paths::rebase(&path, &source, &dest), print);
                }
            }
            log::debug!("moved entry source={source} dest={dest} count={moved}");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_bytes;
    use crate::types::EntryType;
    use std::fs;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Index) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("b/d")).unwrap();
        fs::write(temp.path().join("a.tif"), b"aaaa").unwrap();
        fs::write(temp.path().join("b/c.tif"), b"cc").unwrap();
        fs::write(temp.path().join("b/d/e.txt"), b"e").unwrap();
        let index = Index::open_or_init(temp.path()).unwrap();
        (temp, index)
    }

    fn paths_of(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.path.as_str()).collect()
    }

    #[test]
    fn add_file_creates_parent_directories() {
        let (_temp, index) = fixture();
        let added = index.add(&["b/d/e.txt"], AddOptions::default()).unwrap();
        assert_eq!(paths_of(&added), vec!["b", "b/d", "b/d/e.txt"]);
        assert_eq!(added[0].entry_type, EntryType::Directory);
        assert_eq!(added[2].depth, 2);
        assert!(!added[2].hash.is_empty());
    }

    #[test]
    fn non_recursive_directory_adds_only_itself() {
        let (_temp, index) = fixture();
        let added = index.add(&["b"], AddOptions::default()).unwrap();
        assert_eq!(paths_of(&added), vec!["b"]);
    }

    #[test]
    fn missing_path_is_io_error_and_commits_nothing() {
        let (_temp, index) = fixture();
        let error = index.add(&["a.tif", "nope.tif"], AddOptions::default()).unwrap_err();
        assert!(matches!(error, IndexError::Io { .. }));
        assert!(index.read().is_empty());
    }

    #[test]
    fn empty_add_is_validation_error() {
        let (_temp, index) = fixture();
        let none: [&str; 0] = [];
        assert!(matches!(
            index.add(&none, AddOptions::default()),
            Err(IndexError::Validation(_))
        ));
    }

    #[test]
    fn remove_cascades_to_descendants() {
        let (temp, index) = fixture();
        index.add(&[temp.path()], AddOptions { recursive: true }).unwrap();
        let removed = index.remove(&["b"]).unwrap();
        assert_eq!(removed, vec!["b", "b/c.tif", "b/d", "b/d/e.txt"]);
        assert!(matches!(index.remove(&["b"]), Err(IndexError::NotFound(_))));
    }

    #[test]
    fn list_children_and_depth_limits() {
        let (temp, index) = fixture();
        index.add(&[temp.path()], AddOptions { recursive: true }).unwrap();
        let none: [&str; 0] = [];

        let top = index.list(&none, ListOptions::default()).unwrap();
        assert_eq!(paths_of(&top), vec!["a.tif", "b"]);

        let shallow = index
            .list(&["b"], ListOptions { recursive: true, max_depth: 1 })
            .unwrap();
        assert_eq!(paths_of(&shallow), vec!["b/c.tif", "b/d"]);

        let file = index.list(&["a.tif"], ListOptions::default()).unwrap();
        assert_eq!(paths_of(&file), vec!["a.tif"]);

        assert!(matches!(
            index.list(&none, ListOptions { recursive: true, max_depth: -1 }),
            Err(IndexError::Validation(_))
        ));
        assert!(matches!(
            index.list(&["zzz"], ListOptions::default()),
            Err(IndexError::NotFound(_))
        ));
    }

    #[test]
    fn move_entry_carries_descendants_and_meta() {
        let (temp, index) = fixture();
        index.add(&[temp.path()], AddOptions { recursive: true }).unwrap();
        index
            .meta()
            .add("b/c.tif", "note", &serde_json::json!("x"))
            .unwrap();
        let hash = index.read().entry("b/c.tif").unwrap().hash.clone();

        index.move_entry("b", "x/y").unwrap();
        let state = index.read();
        assert!(state.entry("x").unwrap().is_dir());
        assert_eq!(state.entry("x/y/c.tif").unwrap().hash, hash);
        assert_eq!(state.entry("x/y/d/e.txt").unwrap().depth, 3);
        assert!(!state.contains("b"));
        assert_eq!(state.meta_list("x/y/c.tif")[0].key, "note");
    }

    #[test]
    fn move_entry_errors() {
        let (temp, index) = fixture();
        index.add(&[temp.path()], AddOptions { recursive: true }).unwrap();
        assert!(matches!(
            index.move_entry("nope", "z"),
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            index.move_entry("a.tif", "b"),
            Err(IndexError::Conflict(_))
        ));
        assert!(matches!(
            index.move_entry("b", "b/d/inner"),
            Err(IndexError::Validation(_))
        ));
    }

    #[test]
    fn move_checks_source_before_dest() {
        let (temp, index) = fixture();
        index.add(&[temp.path()], AddOptions { recursive: true }).unwrap();
        assert!(matches!(
            index.move_entry("ghost.tif", "ghost.tif"),
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            index.move_entry("ghost", "ghost/inner"),
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            index.move_entry("a.tif", "a.tif"),
            Err(IndexError::Conflict(_))
        ));
    }

    #[test]
    fn move_below_an_indexed_file_is_rejected() {
        let (temp, index) = fixture();
        index.add(&[temp.path()], AddOptions { recursive: true }).unwrap();
        assert!(matches!(
            index.move_entry("b/c.tif", "a.tif/z.tif"),
            Err(IndexError::Validation(_))
        ));
        assert!(matches!(
            index.move_entry("b/c.tif", "a.tif/deeper/z.tif"),
            Err(IndexError::Validation(_))
        ));
        let state = index.read();
        assert!(state.contains("b/c.tif"));
        assert!(!state.contains("a.tif/z.tif"));
        assert!(!state.entry("a.tif").unwrap().is_dir());
    }

    #[test]
    fn same_size_rewrite_is_rehashed() {
        let (temp, index) = fixture();
        let file = temp.path().join("a.tif");
        index.add(&["a.tif"], AddOptions::default()).unwrap();
        assert_eq!(index.read().entry("a.tif").unwrap().hash, hash_bytes(b"aaaa"));

        fs::write(&file, b"bbbb").unwrap();
        index.add(&["a.tif"], AddOptions::default()).unwrap();
        assert_eq!(index.read().entry("a.tif").unwrap().hash, hash_bytes(b"bbbb"));
    }

    #[test]
    fn sub_second_mtime_change_is_rehashed() {
        let (temp, index) = fixture();
        let file = temp.path().join("a.tif");
        let written = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        set_mtime(&file, written);
        index.add(&["a.tif"], AddOptions::default()).unwrap();

        fs::write(&file, b"bbbb").unwrap();
        set_mtime(&file, written + Duration::from_millis(400));
        index.add(&["a.tif"], AddOptions::default()).unwrap();
        let state = index.read();
        let entry = state.entry("a.tif").unwrap();
        assert_eq!(entry.hash, hash_bytes(b"bbbb"));
        assert_eq!(entry.mtime, Some(1_700_000_000));
    }

    #[test]
    fn settled_file_with_same_fingerprint_reuses_hash() {
        let (temp, index) = fixture();
        let file = temp.path().join("a.tif");
        let written = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        set_mtime(&file, written);
        index.add(&["a.tif"], AddOptions::default()).unwrap();

        // Same size and same mtime: the stored hash is kept without reading.
        fs::write(&file, b"zzzz").unwrap();
        set_mtime(&file, written);
        index.add(&["a.tif"], AddOptions::default()).unwrap();
        assert_eq!(index.read().entry("a.tif").unwrap().hash, hash_bytes(b"aaaa"));
    }

    #[test]
    fn fingerprints_follow_remove_and_move() {
        let (temp, index) = fixture();
        index.add(&[temp.path()], AddOptions { recursive: true }).unwrap();
        assert!(index.read().fingerprints.contains_key("b/c.tif"));
        assert!(!index.read().fingerprints.contains_key("b"));

        index.move_entry("b", "x").unwrap();
        {
            let state = index.read();
            assert!(state.fingerprints.contains_key("x/c.tif"));
            assert!(!state.fingerprints.contains_key("b/c.tif"));
        }
        index.remove(&["x"]).unwrap();
        let state = index.read();
        assert_eq!(state.fingerprints.keys().collect::<Vec<_>>(), vec!["a.tif"]);
    }

    #[cfg(unix)]
    #[test]
    fn recursive_add_does_not_follow_symlinked_directories() {
        let (temp, index) = fixture();
        std::os::unix::fs::symlink("..", temp.path().join("b/d/loop")).unwrap();
        let added = index.add(&["b"], AddOptions { recursive: true }).unwrap();
        assert_eq!(
            paths_of(&added),
            vec!["b", "b/c.tif", "b/d", "b/d/e.txt", "b/d/loop"]
        );
        let link = &added[4];
        assert_eq!(link.entry_type, EntryType::Generic);
        assert_eq!(link.hash, hash_bytes(b".."));
    }

    #[cfg(unix)]
    #[test]
    fn undecodable_child_name_fails_recursive_add() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (temp, index) = fixture();
        fs::write(temp.path().join(OsStr::from_bytes(b"b/bad\xff.tif")), b"x").unwrap();
        assert!(matches!(
            index.add(&["b"], AddOptions { recursive: true }),
            Err(IndexError::Validation(_))
        ));
        assert!(index.read().is_empty());
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::OpenOptions::new()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }
}
