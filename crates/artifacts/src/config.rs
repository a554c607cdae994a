use std::path::PathBuf;

/// Settings for derived artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    /// Root of the tile and thumbnail cache.
    pub cache_dir: PathBuf,
    /// Longest side of a build overview, in pixels.
    pub overview_max_px: u32,
    /// JPEG quality for thumbnails, 1..=100.
    pub jpeg_quality: u8,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            overview_max_px: 1024,
            jpeg_quality: 85,
        }
    }
}

impl ArtifactConfig {
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }
}

/// `<platform cache dir>/geoindex`, or a temp directory when the platform
/// has none.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("geoindex")
}
