//! Content-addressed cache for tiles and thumbnails.
//!
//! Every artifact is keyed by the BLAKE3 hash of its source file plus the
//! request parameters, so a cached artifact is valid for as long as the
//! file content is unchanged.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use geoindex::{hasher, Index, IndexError, ReadLease, Result};
use image::ImageFormat;
use serde::Serialize;

use crate::config::ArtifactConfig;
use crate::raster::{self, GeoRaster};
use crate::thumbnail::{self, Thumbnail, ThumbnailTarget};
use crate::tile::TileRequest;

/// Snapshot of cache activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub tiles_rendered: u64,
    pub tiles_cached: u64,
    pub thumbnails_rendered: u64,
    pub thumbnails_cached: u64,
}

#[derive(Debug, Default)]
struct Counters {
    tiles_rendered: AtomicU64,
    tiles_cached: AtomicU64,
    thumbnails_rendered: AtomicU64,
    thumbnails_cached: AtomicU64,
}

#[derive(Debug)]
pub struct ArtifactCache {
    config: ArtifactConfig,
    counters: Counters,
}

impl ArtifactCache {
    pub fn new(config: ArtifactConfig) -> Self {
        Self {
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &ArtifactConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tiles_rendered: self.counters.tiles_rendered.load(Ordering::Relaxed),
            tiles_cached: self.counters.tiles_cached.load(Ordering::Relaxed),
            thumbnails_rendered: self.counters.thumbnails_rendered.load(Ordering::Relaxed),
            thumbnails_cached: self.counters.thumbnails_cached.load(Ordering::Relaxed),
        }
    }

    fn tiles_dir(&self) -> PathBuf {
        self.config.cache_dir.join("tiles")
    }

    fn thumbs_dir(&self) -> PathBuf {
        self.config.cache_dir.join("thumbs")
    }

    // -----------------------------------------------------------------------
    // Thumbnails
    // -----------------------------------------------------------------------

    /// Thumbnail of any decodable image, longest side `size`.
    pub fn generate_thumbnail(
        &self,
        file: &Path,
        size: u32,
        target: ThumbnailTarget,
    ) -> Result<Thumbnail> {
        thumbnail::validate_size(size)?;
        let hash = hasher::hash_file(file)?;
        self.thumbnail_with_hash(file, &hash, size, target)
    }

    /// Thumbnail of an indexed entry, keyed by its current content hash.
    pub fn thumbnail_for_entry(
        &self,
        index: &Index,
        path: &str,
        size: u32,
        target: ThumbnailTarget,
    ) -> Result<Thumbnail> {
        thumbnail::validate_size(size)?;
        let lease = index.read_lease();
        let (file, hash) = indexed_file(&lease, path)?;
        self.thumbnail_with_hash(&file, &hash, size, target)
    }

    fn thumbnail_with_hash(
        &self,
        file: &Path,
        hash: &str,
        size: u32,
        target: ThumbnailTarget,
    ) -> Result<Thumbnail> {
        let cached =
            thumbnail::cache_path(&self.thumbs_dir(), hash, size, self.config.jpeg_quality);
        if cached.is_file() {
            self.counters.thumbnails_cached.fetch_add(1, Ordering::Relaxed);
            log::debug!("thumbnail cache hit hash={hash} size={size}");
        } else {
            let bytes = thumbnail::render(file, size, self.config.jpeg_quality)?;
            write_atomic(&cached, &bytes)?;
            self.counters.thumbnails_rendered.fetch_add(1, Ordering::Relaxed);
            log::debug!("rendered thumbnail hash={hash} size={size}");
        }

        match target {
            ThumbnailTarget::Memory => fs::read(&cached)
                .map(Thumbnail::Memory)
                .map_err(|error| IndexError::io(&cached, error)),
            ThumbnailTarget::File(dest) => {
                if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|error| IndexError::io(parent, error))?;
                }
                fs::copy(&cached, &dest).map_err(|error| IndexError::io(&dest, error))?;
                Ok(Thumbnail::File(dest))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tiles
    // -----------------------------------------------------------------------

    /// Renders (or reuses) one Web Mercator tile of a georeferenced raster.
    pub fn generate_tile(&self, file: &Path, request: &TileRequest) -> Result<PathBuf> {
        request.validate()?;
        let hash = hasher::hash_file(file)?;
        self.tile_with_hash(file, &hash, request)
    }

    /// Tile of an indexed entry, keyed by its current content hash.
    pub fn tile_for_entry(
        &self,
        index: &Index,
        path: &str,
        request: &TileRequest,
    ) -> Result<PathBuf> {
        request.validate()?;
        let lease = index.read_lease();
        let (file, hash) = indexed_file(&lease, path)?;
        self.tile_with_hash(&file, &hash, request)
    }

    fn tile_with_hash(&self, file: &Path, hash: &str, request: &TileRequest) -> Result<PathBuf> {
        let cached = request.cache_path(&self.tiles_dir().join(hash));
        if !request.force_recreate && cached.is_file() {
            self.counters.tiles_cached.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "tile cache hit hash={hash} z={} x={} y={}",
                request.z,
                request.x,
                request.y
            );
            return Ok(cached);
        }

        let source = GeoRaster::load(file)?;
        let tile_bounds = request.mercator_bounds();
        let covered = source
            .mercator_bounds()
            .is_some_and(|bounds| raster::intersects(bounds, tile_bounds));
        if !covered {
            return Err(IndexError::Validation(format!(
                "tile {}/{}/{} is out of bounds for {}",
                request.z,
                request.x,
                request.y,
                file.display()
            )));
        }

        let tile = source.render(tile_bounds, request.tile_size, request.tile_size);
        let mut bytes = Vec::new();
        tile.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|error| IndexError::Build(format!("failed to encode tile: {error}")))?;
        write_atomic(&cached, &bytes)?;
        self.counters.tiles_rendered.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "rendered tile hash={hash} z={} x={} y={} size={}",
            request.z,
            request.x,
            request.y,
            request.tile_size
        );
        Ok(cached)
    }
}

/// Filesystem path and current content hash of an indexed file. The stored
/// hash is used while the file still matches its fingerprint.
fn indexed_file(lease: &ReadLease<'_>, path: &str) -> Result<(PathBuf, String)> {
    let resolved = lease.resolve(path)?;
    let entry = lease
        .entry(&resolved)
        .ok_or_else(|| IndexError::NotFound(format!("{path} is not indexed")))?;
    if entry.is_dir() {
        return Err(IndexError::Validation(format!("{path} is not a file")));
    }
    let file = lease.fs_path(&resolved);
    let hash = lease.verified_hash(&resolved, &file)?;
    Ok((file, hash))
}

/// Writes `bytes` to `path` through a synced temporary file in the same
/// directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| IndexError::Validation(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent).map_err(|error| IndexError::io(parent, error))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|error| IndexError::io(parent, error))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|error| IndexError::io(tmp.path(), error))?;
    tmp.persist(path)
        .map_err(|error| IndexError::io(path, error.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/c.bin");
        write_atomic(&path, b"data").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"data");
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn stats_start_at_zero() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(ArtifactConfig::with_cache_dir(temp.path()));
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
