//! Asset classification and add-time property extraction.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde_json::json;

use crate::georef::{self, Georeference};
use crate::json::JsonBlob;
use crate::types::{EntryType, Properties};

const RASTER_EXTENSIONS: &[&str] = &["tif", "tiff", "png", "jpg", "jpeg", "webp", "bmp"];
const POINT_CLOUD_EXTENSIONS: &[&str] = &["las", "laz"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];
const MODEL_EXTENSIONS: &[&str] = &["obj", "ply", "glb", "gltf"];
const VECTOR_EXTENSIONS: &[&str] = &["geojson", "kml", "gpkg", "shp"];

fn extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn is_raster(path: &Path) -> bool {
    RASTER_EXTENSIONS.contains(&extension(path).as_str())
}

/// Classifies a regular file and extracts its properties.
pub fn inspect_file(path: &Path) -> (EntryType, Properties) {
    let ext = extension(path);
    let ext = ext.as_str();
    let mut properties = Properties::new();

    let entry_type = if RASTER_EXTENSIONS.contains(&ext) {
        let size = raster_size(path);
        if let Some((width, height)) = size {
            properties.insert("width".into(), JsonBlob::from_value(&json!(width)));
            properties.insert("height".into(), JsonBlob::from_value(&json!(height)));
        }
        match georef::probe(path) {
            Some(georef) => {
                insert_spatial(&mut properties, &georef, size);
                if matches!(ext, "tif" | "tiff") {
                    EntryType::GeoRaster
                } else {
                    EntryType::GeoImage
                }
            }
            None => EntryType::Image,
        }
    } else if POINT_CLOUD_EXTENSIONS.contains(&ext) {
        EntryType::PointCloud
    } else if ext == "md" {
        EntryType::Markdown
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        EntryType::Video
    } else if MODEL_EXTENSIONS.contains(&ext) {
        EntryType::Model
    } else if VECTOR_EXTENSIONS.contains(&ext) {
        EntryType::Vector
    } else {
        EntryType::Generic
    };

    (entry_type, properties)
}

fn insert_spatial(properties: &mut Properties, georef: &Georeference, size: Option<(u32, u32)>) {
    properties.insert(
        "crs".into(),
        JsonBlob::from_value(&json!(georef.crs.label())),
    );
    if let Some(bounds) = size.and_then(|(width, height)| georef.bounds(width, height)) {
        properties.insert("bounds".into(), JsonBlob::from_value(&json!(bounds)));
    }
}

/// Pixel dimensions read from the raster header.
pub fn raster_size(path: &Path) -> Option<(u32, u32)> {
    match image::image_dimensions(path) {
        Ok(size) => Some(size),
        Err(error) => {
            // Scientific TIFFs (float bands, odd layouts) are outside what the
            // image decoders accept but still carry a plain header.
            let size = File::open(path).ok().and_then(|file| {
                tiff::decoder::Decoder::new(BufReader::new(file))
                    .ok()?
                    .dimensions()
                    .ok()
            });
            if size.is_none() {
                log::debug!("no raster header for {}: {error}", path.display());
            }
            size
        }
    }
}
