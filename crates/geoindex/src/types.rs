//! Entry model and operation options.

use std::collections::BTreeMap;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::ErrorKind;
use crate::json::JsonBlob;

/// Kind of asset an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    #[default]
    Undefined,
    Directory,
    Generic,
    GeoImage,
    GeoRaster,
    PointCloud,
    Image,
    Markdown,
    Video,
    Model,
    Vector,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Directory => "directory",
            Self::Generic => "generic",
            Self::GeoImage => "geoimage",
            Self::GeoRaster => "georaster",
            Self::PointCloud => "pointcloud",
            Self::Image => "image",
            Self::Markdown => "markdown",
            Self::Video => "video",
            Self::Model => "model",
            Self::Vector => "vector",
        }
    }

    pub fn is_directory(self) -> bool {
        self == Self::Directory
    }
}

pub type Properties = BTreeMap<String, JsonBlob>;

/// One filesystem object tracked by an index.
///
/// `path` is `/`-separated and relative to the index root (for [`crate::info`]
/// results it is the path as given by the caller). `hash` is empty for
/// directories.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Entry {
    pub path: String,
    #[serde(default)]
    pub hash: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mtime: Option<i64>,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub properties: Properties,
}

impl Entry {
    pub fn directory(path: impl Into<String>, mtime: Option<i64>) -> Self {
        let path = path.into();
        Self {
            depth: path_depth(&path),
            path,
            hash: String::new(),
            entry_type: EntryType::Directory,
            size: 0,
            mtime,
            properties: Properties::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type.is_directory()
    }

    pub fn property(&self, key: &str) -> Option<serde_json::Value> {
        self.properties.get(key).map(JsonBlob::to_value)
    }
}

// Empty optional fields are omitted on the JSON surface but always written to
// the binary index format, which relies on a fixed field layout.
impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let compact = serializer.is_human_readable();
        let skip_hash = compact && self.hash.is_empty();
        let skip_mtime = compact && self.mtime.is_none();
        let skip_properties = compact && self.properties.is_empty();
        let fields = 7 - [skip_hash, skip_mtime, skip_properties]
            .iter()
            .filter(|skip| **skip)
            .count();

        let mut state = serializer.serialize_struct("Entry", fields)?;
        state.serialize_field("path", &self.path)?;
        if skip_hash {
            state.skip_field("hash")?;
        } else {
            state.serialize_field("hash", &self.hash)?;
        }
        state.serialize_field("type", &self.entry_type)?;
        state.serialize_field("size", &self.size)?;
        if skip_mtime {
            state.skip_field("mtime")?;
        } else {
            state.serialize_field("mtime", &self.mtime)?;
        }
        state.serialize_field("depth", &self.depth)?;
        if skip_properties {
            state.skip_field("properties")?;
        } else {
            state.serialize_field("properties", &self.properties)?;
        }
        state.end()
    }
}

/// Number of `/` separators in an index path.
pub fn path_depth(path: &str) -> u32 {
    path.bytes().filter(|byte| *byte == b'/').count() as u32
}

/// Options for [`crate::Index::add`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Descend into directories. Default `false`: a directory adds only itself.
    pub recursive: bool,
}

/// Options for [`crate::Index::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// List descendants instead of direct children. Default `false`.
    pub recursive: bool,
    /// Maximum depth below each requested path; `0` (default) is unlimited,
    /// negative values are rejected.
    pub max_depth: i32,
}

/// Options for [`crate::info`].
#[derive(Debug, Clone, Copy)]
pub struct InfoOptions {
    /// Describe directory contents too. Default `false`.
    pub recursive: bool,
    /// Maximum recursion depth; `0` (default) is unlimited.
    pub max_depth: i32,
    /// Compute content hashes. Default `false`.
    pub with_hash: bool,
    /// Abort on the first failing path. Default `true`; when `false`,
    /// failures are collected in [`InfoReport::failures`].
    pub stop_on_error: bool,
}

impl Default for InfoOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            max_depth: 0,
            with_hash: false,
            stop_on_error: true,
        }
    }
}

/// A path that could not be described by [`crate::info`].
#[derive(Debug, Clone, Serialize)]
pub struct InfoFailure {
    pub path: String,
    pub kind: ErrorKind,
    pub error: String,
}

/// Result of [`crate::info`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct InfoReport {
    pub entries: Vec<Entry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<InfoFailure>,
}
