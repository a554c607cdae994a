//! Derived products for buildable assets.
//!
//! A build renders each buildable raster into `<dest>/<hash>/overview.png`
//! (resampled to Web Mercator) and records it in `<dest>/<hash>/build.json`.
//! The record is written last, so its presence with a matching hash marks a
//! finished build.

use std::fs;
use std::path::Path;

use geoindex::config::BUILD_FOLDER;
use geoindex::georef::Crs;
use geoindex::{Entry, EntryType, Index, IndexError, IndexLease, Result};
use image::ImageFormat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::write_atomic;
use crate::config::ArtifactConfig;
use crate::raster::GeoRaster;

pub const OVERVIEW_FILE: &str = "overview.png";
pub const BUILD_RECORD_FILE: &str = "build.json";

/// Options for [`Builder::build`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Rebuild assets whose outputs are already up to date.
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub built: Vec<String>,
    pub skipped: Vec<String>,
}

/// Contents of `build.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub path: String,
    pub hash: String,
    pub bounds: Option<[f64; 4]>,
    pub width: u32,
    pub height: u32,
    pub built_at: i64,
}

/// True for georeferenced rasters in a spatial reference we can resample.
pub fn is_buildable(entry: &Entry) -> bool {
    if !matches!(entry.entry_type, EntryType::GeoRaster | EntryType::GeoImage) {
        return false;
    }
    match entry.property("crs").as_ref().and_then(|crs| crs.as_str()) {
        Some(label) => label == Crs::Wgs84.label() || label == Crs::WebMercator.label(),
        None => false,
    }
}

enum Outcome {
    Built,
    Skipped,
}

pub struct Builder<'a> {
    index: &'a Index,
    config: ArtifactConfig,
}

impl<'a> Builder<'a> {
    pub fn new(index: &'a Index, config: ArtifactConfig) -> Self {
        Self { index, config }
    }

    /// Whether the indexed entry at `path` is buildable; unknown paths are not.
    pub fn is_buildable(&self, path: &str) -> bool {
        let lease = self.index.read_lease();
        lease
            .resolve(path)
            .ok()
            .and_then(|resolved| lease.entry(&resolved).map(is_buildable))
            .unwrap_or(false)
    }

    /// Builds every buildable asset under `source` (the whole index when
    /// `None`) into `dest` (default `<root>/.ddb/build`).
    ///
    /// Mutations of the index wait until the build finishes.
    pub fn build(
        &self,
        source: Option<&str>,
        dest: Option<&Path>,
        options: BuildOptions,
    ) -> Result<BuildReport> {
        let lease = self.index.lease();
        let dest = dest
            .map(Path::to_path_buf)
            .unwrap_or_else(|| lease.index_dir().join(BUILD_FOLDER));

        let targets: Vec<Entry> = match source {
            None => buildable_under(&lease, ""),
            Some(source) => {
                let resolved = lease.resolve(source)?;
                if resolved.is_empty() {
                    buildable_under(&lease, "")
                } else {
                    let entry = lease
                        .entry(&resolved)
                        .ok_or_else(|| IndexError::NotFound(format!("{source} is not indexed")))?;
                    if entry.is_dir() {
                        buildable_under(&lease, &resolved)
                    } else if is_buildable(entry) {
                        vec![entry.clone()]
                    } else {
                        return Err(IndexError::Build(format!(
                            "{source} is not buildable ({})",
                            entry.entry_type.as_str()
                        )));
                    }
                }
            }
        };

        let outcomes = targets
            .par_iter()
            .map(|entry| {
                self.build_one(&lease, entry, &dest, options)
                    .map(|outcome| (entry.path.clone(), outcome))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut report = BuildReport::default();
        for (path, outcome) in outcomes {
            match outcome {
                Outcome::Built => report.built.push(path),
                Outcome::Skipped => report.skipped.push(path),
            }
        }
        log::info!(
            "build finished dest={} built={} skipped={}",
            dest.display(),
            report.built.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn build_one(
        &self,
        lease: &IndexLease<'_>,
        entry: &Entry,
        dest: &Path,
        options: BuildOptions,
    ) -> Result<Outcome> {
        let fs_path = lease.fs_path(&entry.path);
        // Outputs are keyed by the bytes rendered, which may have changed
        // since the entry was added.
        let hash = lease.verified_hash(&entry.path, &fs_path)?;
        if hash.is_empty() {
            return Err(IndexError::Build(format!("{} has no content hash", entry.path)));
        }
        let out_dir = dest.join(&hash);
        let record_path = out_dir.join(BUILD_RECORD_FILE);
        if !options.force && read_record(&record_path).is_some_and(|r| r.hash == hash) {
            log::debug!("build up to date path={}", entry.path);
            return Ok(Outcome::Skipped);
        }

        let fail = |error: IndexError| {
            IndexError::Build(format!("failed to build {}: {error}", entry.path))
        };
        let raster = GeoRaster::load(&fs_path).map_err(fail)?;
        let bounds = raster
            .mercator_bounds()
            .ok_or_else(|| fail(IndexError::NotGeoreferenced("no bounds".into())))?;
        let (width, height) = overview_size(&raster, bounds, self.config.overview_max_px);
        let overview = raster.render(bounds, width, height);

        let mut png = Vec::new();
        overview
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|error| IndexError::Build(format!("failed to encode overview: {error}")))?;
        write_atomic(&out_dir.join(OVERVIEW_FILE), &png)?;

        let record = BuildRecord {
            path: entry.path.clone(),
            hash: hash.clone(),
            bounds: raster.bounds(),
            width,
            height,
            built_at: chrono::Utc::now().timestamp(),
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|error| IndexError::Build(format!("failed to encode build record: {error}")))?;
        write_atomic(&record_path, &json)?;
        log::debug!(
            "built path={} hash={hash} size={width}x{height}",
            entry.path
        );
        Ok(Outcome::Built)
    }
}

fn buildable_under(lease: &IndexLease<'_>, path: &str) -> Vec<Entry> {
    lease
        .subtree(path)
        .filter(|entry| is_buildable(entry))
        .cloned()
        .collect()
}

fn read_record(path: &Path) -> Option<BuildRecord> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Output size matching the Mercator aspect ratio, longest side capped by
/// both `max_px` and the source resolution.
fn overview_size(raster: &GeoRaster, bounds: [f64; 4], max_px: u32) -> (u32, u32) {
    let long_side = max_px.min(raster.width().max(raster.height())).max(1);
    let span_x = bounds[2] - bounds[0];
    let span_y = bounds[3] - bounds[1];
    if span_x >= span_y {
        let height = (f64::from(long_side) * span_y / span_x).round().max(1.0) as u32;
        (long_side, height)
    } else {
        let width = (f64::from(long_side) * span_x / span_y).round().max(1.0) as u32;
        (width, long_side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoindex::{JsonBlob, Properties};
    use serde_json::json;

    fn entry(entry_type: EntryType, crs: Option<&str>) -> Entry {
        let mut properties = Properties::new();
        if let Some(crs) = crs {
            properties.insert("crs".into(), JsonBlob::from_value(&json!(crs)));
        }
        Entry {
            path: "a.tif".into(),
            hash: "h".into(),
            entry_type,
            size: 1,
            mtime: None,
            depth: 0,
            properties,
        }
    }

    #[test]
    fn buildability_rules() {
        assert!(is_buildable(&entry(EntryType::GeoRaster, Some("EPSG:4326"))));
        assert!(is_buildable(&entry(EntryType::GeoImage, Some("EPSG:3857"))));
        assert!(!is_buildable(&entry(EntryType::GeoRaster, Some("EPSG:32633"))));
        assert!(!is_buildable(&entry(EntryType::Image, None)));
        assert!(!is_buildable(&entry(EntryType::PointCloud, None)));
    }

    #[test]
    fn record_round_trips() {
        let record = BuildRecord {
            path: "a.tif".into(),
            hash: "h".into(),
            bounds: Some([1.0, 2.0, 3.0, 4.0]),
            width: 10,
            height: 5,
            built_at: 0,
        };
        let text = serde_json::to_string(&record).unwrap();
        assert_eq!(serde_json::from_str::<BuildRecord>(&text).unwrap(), record);
    }
}
