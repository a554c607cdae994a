//! Ad-hoc description of filesystem paths, indexed or not.

use std::path::Path;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::types::{InfoFailure, InfoOptions, InfoReport};
use crate::walk::{self, Candidate, HashPlan, Walker};

/// Describes `inputs` straight from the filesystem.
///
/// Entry paths are the inputs as given, with walked children joined by `/`.
/// Depth is measured from the input that led to each entry.
pub fn info<P: AsRef<Path>>(inputs: &[P], options: InfoOptions) -> Result<InfoReport> {
    if inputs.is_empty() {
        return Err(IndexError::Validation("no paths to describe".into()));
    }
    if options.max_depth < 0 {
        return Err(IndexError::Validation(format!(
            "max depth must not be negative, got {}",
            options.max_depth
        )));
    }

    let mut walker = Walker::new(options.max_depth as u32, options.stop_on_error);
    let mut candidates = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        let shown = input.to_string_lossy();
        let trimmed = shown.trim_end_matches(['/', '\\']);
        let label: &str = if trimmed.is_empty() { &shown } else { trimmed };

        let candidate = match Candidate::stat(input.to_path_buf(), label.to_string(), 0) {
            Ok(candidate) => candidate,
            Err(error) if !options.stop_on_error => {
                walker.failures.push((label.to_string(), error));
                continue;
            }
            Err(error) => return Err(error),
        };
        if candidate.is_dir && options.recursive {
            let mut found = Vec::new();
            walker.walk(&candidate, &|level| level, &mut found)?;
            candidates.push(candidate);
            candidates.extend(found);
        } else {
            candidates.push(candidate);
        }
    }

    let threads = IndexConfig::default().effective_hash_threads();
    let with_hash = options.with_hash;
    let described = walk::describe_all(&candidates, threads, |_| {
        if with_hash {
            HashPlan::Compute
        } else {
            HashPlan::Skip
        }
    });

    let mut report = InfoReport::default();
    for (candidate, result) in candidates.iter().zip(described) {
        match result {
            Ok(entry) => report.entries.push(entry),
            Err(error) if !options.stop_on_error => {
                walker.failures.push((candidate.path.clone(), error));
            }
            Err(error) => return Err(error),
        }
    }
    report.failures = walker
        .failures
        .into_iter()
        .map(|(path, error)| InfoFailure {
            path,
            kind: error.kind(),
            error: error.to_string(),
        })
        .collect();
    log::debug!(
        "described entries={} failures={}",
        report.entries.len(),
        report.failures.len()
    );
    Ok(report)
}
