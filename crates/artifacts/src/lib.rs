//! Derived artifacts for geoindex assets: builds, thumbnails and map tiles.

pub mod build;
pub mod cache;
pub mod config;
pub mod raster;
pub mod thumbnail;
pub mod tile;

pub use build::{is_buildable, BuildOptions, BuildRecord, BuildReport, Builder};
pub use cache::{ArtifactCache, CacheStats};
pub use config::ArtifactConfig;
pub use thumbnail::{Thumbnail, ThumbnailTarget};
pub use tile::TileRequest;
