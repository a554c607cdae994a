//! Georeference probing for raster assets.
//!
//! Two sources of spatial reference are understood:
//! - world-file sidecars (`.tfw`, `.pgw`, `.jgw`, `.wld`, ...), optionally
//!   accompanied by a `.prj`
//! - GeoTIFF tags (ModelPixelScale + ModelTiepoint, or ModelTransformation,
//!   with the GeoKeyDirectory describing the coordinate system)
//!
//! Only WGS84 geographic and Web Mercator coordinates can be resampled here;
//! any other system is reported as [`Crs::Other`] and left to an external
//! reprojection tool.

use std::f64::consts::PI;
use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tiff::decoder::Decoder;
use tiff::tags::Tag;

pub const EARTH_RADIUS: f64 = 6_378_137.0;
pub const ORIGIN_SHIFT: f64 = PI * EARTH_RADIUS;
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

// 900913 and 102100 do not fit a GeoKey SHORT and only appear in `.prj` text.
const WEB_MERCATOR_CODES: [u16; 2] = [3857, 3785];

/// Coordinate reference system of a raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Crs {
    /// Geographic WGS84 longitude/latitude degrees (EPSG:4326).
    Wgs84,
    /// Spherical Web Mercator metres (EPSG:3857).
    WebMercator,
    /// Anything else, labelled as best known.
    Other(String),
}

impl Crs {
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn label(&self) -> String {
        match self {
            Self::Wgs84 => "EPSG:4326".to_string(),
            Self::WebMercator => "EPSG:3857".to_string(),
            Self::Other(label) => label.clone(),
        }
    }

    /// Converts a coordinate in this system to WGS84 degrees.
    pub fn to_lonlat(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self {
            Self::Wgs84 => Some((x, y)),
            Self::WebMercator => Some(mercator_to_lonlat(x, y)),
            Self::Other(_) => None,
        }
    }

    /// Converts a Web Mercator coordinate into this system.
    pub fn from_mercator(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self {
            Self::Wgs84 => Some(mercator_to_lonlat(x, y)),
            Self::WebMercator => Some((x, y)),
            Self::Other(_) => None,
        }
    }

    /// Converts a coordinate in this system to Web Mercator.
    pub fn to_mercator(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self {
            Self::Wgs84 => Some(lonlat_to_mercator(x, y)),
            Self::WebMercator => Some((x, y)),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Affine pixel-to-world transform in GDAL coefficient order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Maps pixel-space `(col, row)` to world coordinates.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let [x0, a, b, y0, d, e] = self.0;
        (x0 + col * a + row * b, y0 + col * d + row * e)
    }

    /// The world-to-pixel transform, if the matrix is invertible.
    pub fn invert(&self) -> Option<GeoTransform> {
        let [x0, a, b, y0, d, e] = self.0;
        let det = a * e - b * d;
        if det.abs() < f64::EPSILON * 1e-6 || !det.is_finite() {
            return None;
        }
        let ia = e / det;
        let ib = -b / det;
        let id = -d / det;
        let ie = a / det;
        Some(GeoTransform([
            -x0 * ia - y0 * ib,
            ia,
            ib,
            -x0 * id - y0 * ie,
            id,
            ie,
        ]))
    }
}

/// Spatial reference of a raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Georeference {
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl Georeference {
    /// Corner coordinates of a `width` x `height` raster in WGS84 degrees,
    /// clockwise from the top-left.
    pub fn footprint(&self, width: u32, height: u32) -> Option<[(f64, f64); 4]> {
        let (w, h) = (f64::from(width), f64::from(height));
        let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
        let mut out = [(0.0, 0.0); 4];
        for (slot, (col, row)) in out.iter_mut().zip(corners) {
            let (x, y) = self.transform.apply(col, row);
            *slot = self.crs.to_lonlat(x, y)?;
        }
        Some(out)
    }

    /// `[west, south, east, north]` in WGS84 degrees.
    pub fn bounds(&self, width: u32, height: u32) -> Option<[f64; 4]> {
        let corners = self.footprint(width, height)?;
        Some(envelope(&corners))
    }

    /// `[min_x, min_y, max_x, max_y]` in Web Mercator metres.
    pub fn mercator_bounds(&self, width: u32, height: u32) -> Option<[f64; 4]> {
        let (w, h) = (f64::from(width), f64::from(height));
        let mut corners = [(0.0, 0.0); 4];
        for (slot, (col, row)) in corners
            .iter_mut()
            .zip([(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)])
        {
            let (x, y) = self.transform.apply(col, row);
            *slot = self.crs.to_mercator(x, y)?;
        }
        Some(envelope(&corners))
    }
}

fn envelope(points: &[(f64, f64)]) -> [f64; 4] {
    points.iter().fold(
        [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
        |[min_x, min_y, max_x, max_y], (x, y)| {
            [min_x.min(*x), min_y.min(*y), max_x.max(*x), max_y.max(*y)]
        },
    )
}

pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = lon * ORIGIN_SHIFT / 180.0;
    let y = ((90.0 + lat) * PI / 360.0).tan().ln() * EARTH_RADIUS;
    (x, y)
}

pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = x / ORIGIN_SHIFT * 180.0;
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Looks for a spatial reference for the raster at `path`.
///
/// A world-file sidecar takes precedence over embedded GeoTIFF tags.
pub fn probe(path: &Path) -> Option<Georeference> {
    if let Some(georef) = probe_world_file(path) {
        return Some(georef);
    }
    if is_tiff(path) {
        return probe_geotiff(path);
    }
    None
}

fn is_tiff(path: &Path) -> bool {
    matches!(extension_lower(path).as_deref(), Some("tif" | "tiff"))
}

fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Candidate sidecar names: `a.tif` -> `a.tfw`, `a.tifw`, `a.wld`.
fn world_file_candidates(path: &Path) -> Vec<PathBuf> {
    let Some(ext) = extension_lower(path) else {
        return Vec::new();
    };
    let mut candidates = Vec::with_capacity(3);
    let bytes = ext.as_bytes();
    if bytes.len() >= 2 {
        let short = format!(
            "{}{}w",
            bytes[0] as char,
            bytes[bytes.len() - 1] as char
        );
        candidates.push(path.with_extension(short));
    }
    candidates.push(path.with_extension(format!("{ext}w")));
    candidates.push(path.with_extension("wld"));
    candidates
}

/// Parses the six coefficients of an ESRI world file.
///
/// World files reference the centre of the top-left pixel; the returned
/// transform references its outer corner.
pub fn parse_world_file(text: &str) -> Option<GeoTransform> {
    let values: Vec<f64> = text
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .ok()?;
    let [a, d, b, e, c, f] = <[f64; 6]>::try_from(values.get(..6)?).ok()?;
    if values.len() != 6 || values.iter().any(|value| !value.is_finite()) {
        return None;
    }
    Some(GeoTransform([
        c - a / 2.0 - b / 2.0,
        a,
        b,
        f - d / 2.0 - e / 2.0,
        d,
        e,
    ]))
}

fn probe_world_file(path: &Path) -> Option<Georeference> {
    let (sidecar, text) = world_file_candidates(path)
        .into_iter()
        .find_map(|candidate| {
            let text = fs::read_to_string(&candidate).ok()?;
            Some((candidate, text))
        })?;
    let Some(transform) = parse_world_file(&text) else {
        log::warn!("ignoring malformed world file {}", sidecar.display());
        return None;
    };
    let crs = fs::read_to_string(path.with_extension("prj"))
        .ok()
        .map(|wkt| crs_from_wkt(&wkt))
        .unwrap_or_else(|| crs_from_magnitude(&transform));
    Some(Georeference { transform, crs })
}

fn crs_from_wkt(wkt: &str) -> Crs {
    let upper = wkt.to_ascii_uppercase();
    let mercator_markers = [
        "PSEUDO-MERCATOR",
        "PSEUDO_MERCATOR",
        "WEB_MERCATOR",
        "MERCATOR_AUXILIARY_SPHERE",
        "3857",
        "900913",
        "102100",
    ];
    if mercator_markers.iter().any(|marker| upper.contains(marker)) {
        Crs::WebMercator
    } else if upper.contains("PROJCS") || upper.contains("PROJCRS") {
        Crs::Other("projected (from .prj)".to_string())
    } else {
        Crs::Wgs84
    }
}

/// Coordinates outside the range of degrees can only be projected metres.
fn crs_from_magnitude(transform: &GeoTransform) -> Crs {
    let [x0, _, _, y0, _, _] = transform.0;
    if x0.abs() > 180.0 || y0.abs() > 90.0 {
        Crs::WebMercator
    } else {
        Crs::Wgs84
    }
}

fn probe_geotiff(path: &Path) -> Option<Georeference> {
    let file = File::open(path).ok()?;
    let mut decoder = match Decoder::new(BufReader::new(file)) {
        Ok(decoder) => decoder,
        Err(error) => {
            log::debug!("not a readable TIFF {}: {error}", path.display());
            return None;
        }
    };

    let transformation = read_f64_tag(&mut decoder, TAG_MODEL_TRANSFORMATION);
    let scale = read_f64_tag(&mut decoder, TAG_MODEL_PIXEL_SCALE);
    let tiepoint = read_f64_tag(&mut decoder, TAG_MODEL_TIEPOINT);
    let keys = read_geo_keys(&mut decoder);

    let mut transform = match (transformation, scale, tiepoint) {
        (Some(m), _, _) if m.len() >= 8 => GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]),
        (_, Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => GeoTransform([
            t[3] - t[0] * s[0],
            s[0],
            0.0,
            t[4] + t[1] * s[1],
            0.0,
            -s[1],
        ]),
        _ => return None,
    };

    if geo_key(&keys, KEY_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT) {
        let [x0, a, b, y0, d, e] = transform.0;
        transform = GeoTransform([x0 - (a + b) / 2.0, a, b, y0 - (d + e) / 2.0, d, e]);
    }

    let crs = match geo_key(&keys, KEY_MODEL_TYPE) {
        Some(MODEL_TYPE_GEOGRAPHIC) => match geo_key(&keys, KEY_GEOGRAPHIC_TYPE) {
            None | Some(4326) | Some(USER_DEFINED) => Crs::Wgs84,
            Some(code) => Crs::Other(format!("EPSG:{code}")),
        },
        Some(MODEL_TYPE_PROJECTED) => match geo_key(&keys, KEY_PROJECTED_CS_TYPE) {
            Some(code) if WEB_MERCATOR_CODES.contains(&code) => Crs::WebMercator,
            Some(USER_DEFINED) | None => Crs::Other("user-defined projection".to_string()),
            Some(code) => Crs::Other(format!("EPSG:{code}")),
        },
        Some(other) => Crs::Other(format!("model type {other}")),
        None => crs_from_magnitude(&transform),
    };

    Some(Georeference { transform, crs })
}

fn read_f64_tag<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    code: u16,
) -> Option<Vec<f64>> {
    let value = decoder.find_tag(Tag::from_u16_exhaustive(code)).ok()??;
    value.into_f64_vec().ok()
}

fn read_geo_keys<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Vec<u16> {
    decoder
        .find_tag(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY))
        .ok()
        .flatten()
        .and_then(|value| value.into_u16_vec().ok())
        .unwrap_or_default()
}

/// Looks up an inline SHORT value in a GeoKeyDirectory.
fn geo_key(keys: &[u16], id: u16) -> Option<u16> {
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| entry[0] == id && entry[1] == 0)
        .map(|entry| entry[3])
}
