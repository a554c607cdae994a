//! File-backed index for directory trees of geospatial assets.
//!
//! This crate provides:
//! - Entry identity by path and BLAKE3 content hash
//! - Persistent index state with postcard + zstd and atomic writes
//! - Deltas between two independently evolving indexes
//! - Per-path and dataset-global metadata records
//! - A password gate for privileged operations
//! - Georeference probing for world files and GeoTIFF tags

pub mod access;
pub mod classify;
pub mod config;
pub mod delta;
pub mod error;
pub mod georef;
pub mod hasher;
pub mod index;
pub mod info;
pub mod json;
pub mod meta;
pub mod paths;
pub mod types;

mod walk;

// Re-export main types
pub use config::{IndexConfig, IndexManifest, INDEX_FOLDER};
pub use delta::{delta, AddAction, Delta, RemoveAction, Stamp, StampEntry};
pub use error::{ErrorKind, IndexError, Result};
pub use georef::{Crs, GeoTransform, Georeference};
pub use hasher::{Blake3Hasher, ContentHasher};
pub use index::{Index, IndexLease, IndexState, ReadLease};
pub use info::info;
pub use json::JsonBlob;
pub use meta::{Meta, MetaListItem, MetaStore};
pub use types::{
    AddOptions, Entry, EntryType, InfoFailure, InfoOptions, InfoReport, ListOptions, Properties,
};

/// Version of this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
