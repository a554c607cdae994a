//! JPEG thumbnails.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use geoindex::{IndexError, Result};
use image::codecs::jpeg::JpegEncoder;

pub const MAX_THUMBNAIL_SIZE: u32 = 4096;

/// Where a generated thumbnail goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailTarget {
    /// Copy the thumbnail to this file.
    File(PathBuf),
    /// Return the encoded bytes.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thumbnail {
    File(PathBuf),
    Memory(Vec<u8>),
}

pub fn validate_size(size: u32) -> Result<()> {
    if size == 0 || size > MAX_THUMBNAIL_SIZE {
        return Err(IndexError::Validation(format!(
            "thumbnail size must be within 1..={MAX_THUMBNAIL_SIZE}, got {size}"
        )));
    }
    Ok(())
}

/// `<base>/<shard>/<hash>-<size>-q<quality>.jpg`, sharded by the first three
/// hex chars.
pub fn cache_path(base: &Path, hash: &str, size: u32, quality: u8) -> PathBuf {
    let shard = hash.get(..3).unwrap_or(hash);
    base.join(shard).join(format!("{hash}-{size}-q{quality}.jpg"))
}

/// Decodes `path` and encodes a JPEG whose longest side is `size`.
pub(crate) fn render(path: &Path, size: u32, quality: u8) -> Result<Vec<u8>> {
    let source = image::open(path).map_err(|error| match error {
        image::ImageError::IoError(source) => IndexError::io(path, source),
        other => IndexError::Build(format!(
            "cannot decode image {}: {other}",
            path.display()
        )),
    })?;
    let resized = source.thumbnail(size, size).to_rgb8();

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(Cursor::new(&mut bytes), quality.clamp(1, 100))
        .encode_image(&resized)
        .map_err(|error| IndexError::Build(format!("failed to encode thumbnail: {error}")))?;
    Ok(bytes)
}
