//! Index state persistence.
//!
//! The state is encoded with postcard and compressed with zstd. Writes go to
//! a temporary file next to the target which is synced and renamed over it,
//! so a crash leaves either the previous or the new state on disk.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;
use std::thread::available_parallelism;

use serde::{Deserialize, Serialize};

use super::state::IndexState;
use crate::config::{now_secs, INDEX_FORMAT_VERSION};
use crate::error::{IndexError, Result};

#[derive(Serialize)]
struct PersistentStateRef<'a> {
    version: u32,
    saved_at: i64,
    state: &'a IndexState,
}

#[derive(Deserialize)]
struct PersistentState {
    version: u32,
    saved_at: i64,
    state: IndexState,
}

// ---------------------------------------------------------------------------
// Write operations
// ---------------------------------------------------------------------------

pub(crate) fn write_state(path: &Path, state: &IndexState, compression_level: i32) -> Result<()> {
    let storage = PersistentStateRef {
        version: INDEX_FORMAT_VERSION,
        saved_at: now_secs(),
        state,
    };
    let tmp_path = path.with_extension("tmp");

    let result = (|| {
        let output = File::create(&tmp_path).map_err(|error| IndexError::io(&tmp_path, error))?;
        let mut encoder = zstd::Encoder::new(output, compression_level).map_err(|error| {
            IndexError::Integrity(format!("failed to create zstd encoder: {error}"))
        })?;
        if state.len() > 10_000 {
            let threads = available_parallelism().map(|x| x.get() as u32).unwrap_or(4);
            encoder.multithread(threads).map_err(|error| {
                IndexError::Integrity(format!("failed to enable multi-threaded zstd: {error}"))
            })?;
        }

        let mut writer = BufWriter::new(encoder);
        postcard::to_io(&storage, &mut writer).map_err(|error| {
            IndexError::Integrity(format!("failed to encode index state: {error}"))
        })?;
        writer.flush().map_err(|error| IndexError::io(&tmp_path, error))?;
        let encoder = writer
            .into_inner()
            .map_err(|error| IndexError::io(&tmp_path, error.into_error()))?;
        let output = encoder
            .finish()
            .map_err(|error| IndexError::io(&tmp_path, error))?;
        output
            .sync_all()
            .map_err(|error| IndexError::io(&tmp_path, error))
    })();

    if let Err(error) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    fs::rename(&tmp_path, path).map_err(|error| IndexError::io(path, error))?;

    log::debug!(
        "wrote index state to {} (entries={} meta={})",
        path.display(),
        state.len(),
        state.meta.len()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Read operations
// ---------------------------------------------------------------------------

pub(crate) fn read_state(path: &Path) -> Result<IndexState> {
    let input = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(IndexError::Integrity(format!(
                "index state {} is missing",
                path.display()
            )))
        }
        Err(error) => return Err(IndexError::io(path, error)),
    };

    let bytes = zstd::decode_all(input).map_err(|error| {
        IndexError::Integrity(format!(
            "index state decompress failed for {}: {error}",
            path.display()
        ))
    })?;
    let storage: PersistentState = postcard::from_bytes(&bytes).map_err(|error| {
        IndexError::Integrity(format!(
            "index state decode failed for {}: {error}",
            path.display()
        ))
    })?;

    if storage.version != INDEX_FORMAT_VERSION {
        return Err(IndexError::Integrity(format!(
            "index state version mismatch: {} != {INDEX_FORMAT_VERSION}",
            storage.version
        )));
    }

    let mut state = storage.state;
    state.rebuild_lookup();
    log::debug!(
        "loaded index state from {} (entries={} saved_at={})",
        path.display(),
        state.len(),
        storage.saved_at
    );
    Ok(state)
}
