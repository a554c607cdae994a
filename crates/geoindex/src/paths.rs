//! Conversion between filesystem paths and index paths.
//!
//! An index path is relative to the index root, uses `/` separators, has no
//! `.` or `..` components and never starts or ends with `/`. The root itself
//! is the empty string.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::INDEX_FOLDER;
use crate::error::{IndexError, Result};

/// Resolves `input` (absolute, or relative to `root`) to an index path.
///
/// `root` must already be canonical.
pub fn to_index_path(root: &Path, input: &Path) -> Result<String> {
    let absolute = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };
    let normalized = normalize(&absolute)
        .ok_or_else(|| IndexError::Validation(format!("{} escapes the filesystem root", input.display())))?;

    let relative = match normalized.strip_prefix(root) {
        Ok(relative) => relative.to_path_buf(),
        // The caller may have reached the root through a symlink.
        Err(_) => fs::canonicalize(&normalized)
            .ok()
            .and_then(|canonical| canonical.strip_prefix(root).ok().map(Path::to_path_buf))
            .ok_or_else(|| {
                IndexError::Validation(format!(
                    "{} is outside the index root {}",
                    input.display(),
                    root.display()
                ))
            })?,
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    IndexError::Validation(format!("{} is not valid UTF-8", input.display()))
                })?;
                parts.push(part);
            }
            _ => {
                return Err(IndexError::Validation(format!(
                    "unexpected component in {}",
                    input.display()
                )))
            }
        }
    }
    if parts.first() == Some(&INDEX_FOLDER) {
        return Err(IndexError::Validation(format!(
            "{} is inside the index folder",
            input.display()
        )));
    }
    Ok(parts.join("/"))
}

/// Filesystem location of an index path.
pub fn to_fs_path(root: &Path, index_path: &str) -> PathBuf {
    if index_path.is_empty() {
        return root.to_path_buf();
    }
    index_path
        .split('/')
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

/// Lexically resolves `.` and `..`; `None` if `..` climbs above the top.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return None;
                }
            }
        }
    }
    Some(out)
}

/// Proper ancestors of `path`, nearest first, excluding the root.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut current = path;
    std::iter::from_fn(move || {
        let (parent, _) = current.rsplit_once('/')?;
        current = parent;
        Some(parent)
    })
}

/// True when `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return !path.is_empty();
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

pub fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

/// Replaces the `from` prefix of `path` with `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    if path == from {
        return to.to_string();
    }
    let rest = if from.is_empty() {
        path
    } else {
        &path[from.len() + 1..]
    };
    join(to, rest)
}

/// Number of levels `path` sits below `base`; `0` when equal.
pub fn relative_depth(path: &str, base: &str) -> u32 {
    if path == base {
        return 0;
    }
    let rest = if base.is_empty() {
        path
    } else {
        &path[base.len() + 1..]
    };
    rest.split('/').count() as u32
}
