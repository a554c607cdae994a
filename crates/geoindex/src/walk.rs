//! Filesystem walking and entry description.
//!
//! Directories are walked depth-first with children sorted by name, so the
//! collected candidates come out in lexicographic preorder. Symlinks are
//! never followed: they become leaf entries hashed by their target text.
//! Describing the candidates (classification and hashing) then fans out
//! across a rayon pool.

use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rayon::prelude::*;

use crate::classify;
use crate::config::INDEX_FOLDER;
use crate::error::{IndexError, Result};
use crate::hasher;
use crate::paths;
use crate::types::{Entry, EntryType, Properties};

/// A filesystem object about to become an [`Entry`].
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub fs_path: PathBuf,
    /// Index path, or the display path for ad-hoc descriptions.
    pub path: String,
    pub depth: u32,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub mtime: Option<i64>,
    /// Modification time in nanoseconds, used to decide hash reuse.
    pub mtime_ns: Option<i64>,
}

impl Candidate {
    /// Stats `fs_path` without following a trailing symlink.
    pub fn stat(fs_path: PathBuf, path: String, depth: u32) -> Result<Self> {
        let metadata =
            fs::symlink_metadata(&fs_path).map_err(|error| IndexError::io(&fs_path, error))?;
        let file_type = metadata.file_type();
        let mtime_ns = mtime_nanos(&metadata);
        Ok(Self {
            fs_path,
            path,
            depth,
            is_dir: file_type.is_dir(),
            is_symlink: file_type.is_symlink(),
            size: if file_type.is_dir() { 0 } else { metadata.len() },
            mtime: mtime_ns.map(|nanos| nanos.div_euclid(1_000_000_000)),
            mtime_ns,
        })
    }
}

pub(crate) fn mtime_nanos(metadata: &Metadata) -> Option<i64> {
    let since_epoch = metadata.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(since_epoch.as_nanos()).ok()
}

/// Hash of what a non-directory candidate holds: file bytes, or the target
/// of a symlink.
pub(crate) fn content_hash(candidate: &Candidate) -> Result<String> {
    if candidate.is_symlink {
        let target = fs::read_link(&candidate.fs_path)
            .map_err(|error| IndexError::io(&candidate.fs_path, error))?;
        return Ok(hasher::hash_bytes(target.as_os_str().as_encoded_bytes()));
    }
    hasher::hash_file(&candidate.fs_path)
}

/// Collects descendants of directory candidates.
pub(crate) struct Walker {
    /// Levels below the starting directory to descend; `0` is unlimited.
    pub max_depth: u32,
    pub stop_on_error: bool,
    /// Paths skipped because they could not be read.
    pub failures: Vec<(String, IndexError)>,
}

impl Walker {
    pub fn new(max_depth: u32, stop_on_error: bool) -> Self {
        Self {
            max_depth,
            stop_on_error,
            failures: Vec::new(),
        }
    }

    /// Appends every descendant of `dir` to `out` in preorder.
    ///
    /// `depth_of` maps a descendant's level below `dir` (1 for direct
    /// children) to the depth stored on its candidate.
    pub fn walk(
        &mut self,
        dir: &Candidate,
        depth_of: &dyn Fn(u32) -> u32,
        out: &mut Vec<Candidate>,
    ) -> Result<()> {
        self.walk_level(&dir.fs_path, &dir.path, 1, depth_of, out)
    }

    fn walk_level(
        &mut self,
        dir: &Path,
        label: &str,
        level: u32,
        depth_of: &dyn Fn(u32) -> u32,
        out: &mut Vec<Candidate>,
    ) -> Result<()> {
        if self.max_depth != 0 && level > self.max_depth {
            return Ok(());
        }
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(error) => return self.fail(label, IndexError::io(dir, error)),
        };
        let mut children: Vec<(String, PathBuf)> = Vec::new();
        for entry in read_dir {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    self.fail(label, IndexError::io(dir, error))?;
                    continue;
                }
            };
            match entry.file_name().into_string() {
                Ok(name) if name == INDEX_FOLDER => {}
                Ok(name) => children.push((name, entry.path())),
                Err(raw) => {
                    let shown = paths::join(label, &raw.to_string_lossy());
                    self.fail(
                        &shown,
                        IndexError::Validation(format!("{shown} is not a valid UTF-8 name")),
                    )?;
                }
            }
        }
        children.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        for (name, child) in children {
            let child_label = paths::join(label, &name);
            let candidate = match Candidate::stat(child, child_label.clone(), depth_of(level)) {
                Ok(candidate) => candidate,
                Err(error) => {
                    self.fail(&child_label, error)?;
                    continue;
                }
            };
            let descend = candidate.is_dir.then(|| candidate.fs_path.clone());
            out.push(candidate);
            if let Some(child_dir) = descend {
                self.walk_level(&child_dir, &child_label, level + 1, depth_of, out)?;
            }
        }
        Ok(())
    }

    fn fail(&mut self, label: &str, error: IndexError) -> Result<()> {
        if self.stop_on_error {
            return Err(error);
        }
        log::debug!("skipping unreadable path={label}: {error}");
        self.failures.push((label.to_string(), error));
        Ok(())
    }
}

/// How a file's hash is obtained.
pub(crate) enum HashPlan {
    Skip,
    Reuse(String),
    Compute,
}

pub(crate) fn describe(candidate: &Candidate, plan: HashPlan) -> Result<Entry> {
    if candidate.is_dir {
        let mut entry = Entry::directory(candidate.path.clone(), candidate.mtime);
        entry.depth = candidate.depth;
        return Ok(entry);
    }
    let (entry_type, properties) = if candidate.is_symlink {
        (EntryType::Generic, Properties::new())
    } else {
        classify::inspect_file(&candidate.fs_path)
    };
    let hash = match plan {
        HashPlan::Skip => String::new(),
        HashPlan::Reuse(hash) => hash,
        HashPlan::Compute => content_hash(candidate)?,
    };
    Ok(Entry {
        path: candidate.path.clone(),
        hash,
        entry_type,
        size: candidate.size,
        mtime: candidate.mtime,
        depth: candidate.depth,
        properties,
    })
}

/// Describes candidates in parallel; results keep the input order.
pub(crate) fn describe_all<F>(candidates: &[Candidate], threads: usize, plan: F) -> Vec<Result<Entry>>
where
    F: Fn(&Candidate) -> HashPlan + Sync,
{
    let run = || {
        candidates
            .par_iter()
            .map(|candidate| describe(candidate, plan(candidate)))
            .collect::<Vec<_>>()
    };
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(run),
        Err(error) => {
            log::warn!("failed to build hashing pool threads={threads}: {error}");
            run()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("b/d")).unwrap();
        fs::create_dir_all(temp.path().join(INDEX_FOLDER)).unwrap();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();
        fs::write(temp.path().join("b/c.txt"), b"c").unwrap();
        fs::write(temp.path().join("b/d/e.txt"), b"e").unwrap();
        temp
    }

    fn root_candidate(temp: &TempDir) -> Candidate {
        Candidate::stat(temp.path().to_path_buf(), String::new(), 0).unwrap()
    }

    #[test]
    fn walks_in_sorted_preorder_skipping_index_folder() {
        let temp = tree();
        let mut walker = Walker::new(0, true);
        let mut out = Vec::new();
        walker
            .walk(&root_candidate(&temp), &|level| level - 1, &mut out)
            .unwrap();
        let paths: Vec<_> = out.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b", "b/c.txt", "b/d", "b/d/e.txt"]);
        assert_eq!(out[4].depth, 2);
    }

    #[test]
    fn max_depth_limits_levels() {
        let temp = tree();
        let mut walker = Walker::new(1, true);
        let mut out = Vec::new();
        walker
            .walk(&root_candidate(&temp), &|level| level, &mut out)
            .unwrap();
        let paths: Vec<_> = out.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b"]);
    }

    #[test]
    fn describe_all_hashes_files_only() {
        let temp = tree();
        let mut walker = Walker::new(0, true);
        let mut out = Vec::new();
        walker
            .walk(&root_candidate(&temp), &|level| level - 1, &mut out)
            .unwrap();
        let entries: Vec<Entry> = describe_all(&out, 2, |_| HashPlan::Compute)
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries[0].hash, hasher::hash_bytes(b"a"));
        assert!(entries[1].is_dir() && entries[1].hash.is_empty());
        assert_eq!(entries[2].entry_type, EntryType::Generic);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_leaves_hashed_by_target() {
        let temp = tree();
        std::os::unix::fs::symlink("..", temp.path().join("b/loop")).unwrap();
        let mut walker = Walker::new(0, true);
        let mut out = Vec::new();
        walker
            .walk(&root_candidate(&temp), &|level| level - 1, &mut out)
            .unwrap();
        let paths: Vec<_> = out.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b", "b/c.txt", "b/d", "b/d/e.txt", "b/loop"]);

        let link = &out[5];
        assert!(link.is_symlink && !link.is_dir);
        let entry = describe(link, HashPlan::Compute).unwrap();
        assert_eq!(entry.entry_type, EntryType::Generic);
        assert_eq!(entry.hash, hasher::hash_bytes(b".."));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_reported_not_dropped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("good.tif"), b"g").unwrap();
        fs::write(temp.path().join(OsStr::from_bytes(b"bad\xff.tif")), b"b").unwrap();

        let mut strict = Walker::new(0, true);
        assert!(matches!(
            strict.walk(&root_candidate(&temp), &|level| level, &mut Vec::new()),
            Err(IndexError::Validation(_))
        ));

        let mut lenient = Walker::new(0, false);
        let mut out = Vec::new();
        lenient
            .walk(&root_candidate(&temp), &|level| level, &mut out)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "good.tif");
        assert_eq!(lenient.failures.len(), 1);
        assert!(lenient.failures[0].0.starts_with("bad"));
        assert!(matches!(lenient.failures[0].1, IndexError::Validation(_)));
    }

    #[test]
    fn mtime_keeps_sub_second_precision() {
        let temp = tree();
        let file = temp.path().join("a.txt");
        let base = UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let handle = fs::OpenOptions::new().write(true).open(&file).unwrap();
        handle
            .set_modified(base + std::time::Duration::from_millis(400))
            .unwrap();
        drop(handle);
        let candidate = Candidate::stat(file, "a.txt".into(), 0).unwrap();
        assert_eq!(candidate.mtime, Some(1_700_000_000));
        assert_eq!(candidate.mtime_ns, Some(1_700_000_000_400_000_000));
    }
}
