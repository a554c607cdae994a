//! Georeferenced raster sampling in Web Mercator.

use std::path::Path;

use geoindex::georef::{self, GeoTransform, Georeference};
use geoindex::{IndexError, Result};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// A decoded raster with its spatial reference.
pub struct GeoRaster {
    pixels: RgbaImage,
    georef: Georeference,
    inverse: GeoTransform,
}

impl GeoRaster {
    /// Decodes `path` and its georeference.
    ///
    /// Fails with `NotGeoreferenced` when no spatial reference is found or
    /// when it is not one that can be resampled to Web Mercator.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(IndexError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            ));
        }
        let georef = georef::probe(path).ok_or_else(|| {
            IndexError::NotGeoreferenced(format!("{} has no spatial reference", path.display()))
        })?;
        if !georef.crs.is_supported() {
            return Err(IndexError::NotGeoreferenced(format!(
                "{} uses an unsupported spatial reference ({})",
                path.display(),
                georef.crs
            )));
        }
        let inverse = georef.transform.invert().ok_or_else(|| {
            IndexError::NotGeoreferenced(format!(
                "{} has a degenerate geotransform",
                path.display()
            ))
        })?;
        let pixels = image::open(path)
            .map_err(|error| {
                IndexError::Build(format!("cannot decode raster {}: {error}", path.display()))
            })?
            .to_rgba8();
        log::debug!(
            "loaded raster path={} size={}x{} crs={}",
            path.display(),
            pixels.width(),
            pixels.height(),
            georef.crs
        );
        Ok(Self {
            pixels,
            georef,
            inverse,
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// `[west, south, east, north]` in degrees.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        self.georef.bounds(self.width(), self.height())
    }

    /// `[min_x, min_y, max_x, max_y]` in Web Mercator metres.
    pub fn mercator_bounds(&self) -> Option<[f64; 4]> {
        self.georef.mercator_bounds(self.width(), self.height())
    }

    /// Nearest source pixel at a Web Mercator coordinate.
    pub fn sample(&self, x: f64, y: f64) -> Rgba<u8> {
        let Some((sx, sy)) = self.georef.crs.from_mercator(x, y) else {
            return TRANSPARENT;
        };
        let (col, row) = self.inverse.apply(sx, sy);
        if !(col >= 0.0 && row >= 0.0) {
            return TRANSPARENT;
        }
        let (col, row) = (col.floor() as u64, row.floor() as u64);
        if col >= u64::from(self.width()) || row >= u64::from(self.height()) {
            return TRANSPARENT;
        }
        *self.pixels.get_pixel(col as u32, row as u32)
    }

    /// Resamples the Web Mercator window `bounds` into a `width` x `height`
    /// image; areas outside the raster stay transparent.
    pub fn render(&self, bounds: [f64; 4], width: u32, height: u32) -> RgbaImage {
        let [min_x, min_y, max_x, max_y] = bounds;
        let step_x = (max_x - min_x) / f64::from(width);
        let step_y = (max_y - min_y) / f64::from(height);
        let row_len = width as usize * 4;

        let mut buffer = vec![0u8; row_len * height as usize];
        buffer
            .par_chunks_mut(row_len.max(1))
            .enumerate()
            .for_each(|(row, line)| {
                let y = max_y - (row as f64 + 0.5) * step_y;
                for (col, pixel) in line.chunks_exact_mut(4).enumerate() {
                    let x = min_x + (col as f64 + 0.5) * step_x;
                    pixel.copy_from_slice(&self.sample(x, y).0);
                }
            });
        // The buffer length always matches the dimensions.
        RgbaImage::from_raw(width, height, buffer).unwrap_or_else(|| RgbaImage::new(width, height))
    }
}

/// True when two `[min_x, min_y, max_x, max_y]` boxes overlap.
pub fn intersects(a: [f64; 4], b: [f64; 4]) -> bool {
    a[0] < b[2] && b[0] < a[2] && a[1] < b[3] && b[1] < a[3]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture(temp: &TempDir) -> std::path::PathBuf {
        let path = temp.path().join("ortho.png");
        let mut image = RgbaImage::new(4, 4);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgba([x as u8 * 60, y as u8 * 60, 0, 255]);
        }
        image.save(&path).unwrap();
        // 1 degree per pixel, top-left corner at (10E, 40N).
        fs::write(temp.path().join("ortho.pgw"), "1\n0\n0\n-1\n10.5\n39.5\n").unwrap();
        path
    }

    #[test]
    fn samples_nearest_pixel_and_outside_is_transparent() {
        let temp = TempDir::new().unwrap();
        let raster = GeoRaster::load(&fixture(&temp)).unwrap();
        let (x, y) = georef::lonlat_to_mercator(11.5, 38.5);
        assert_eq!(raster.sample(x, y), Rgba([60, 60, 0, 255]));
        let (x, y) = georef::lonlat_to_mercator(0.0, 0.0);
        assert_eq!(raster.sample(x, y), TRANSPARENT);
    }

    #[test]
    fn render_covers_mercator_bounds() {
        let temp = TempDir::new().unwrap();
        let raster = GeoRaster::load(&fixture(&temp)).unwrap();
        let bounds = raster.mercator_bounds().unwrap();
        let image = raster.render(bounds, 8, 8);
        assert_eq!(image.dimensions(), (8, 8));
        assert!(image.pixels().all(|pixel| pixel.0[3] == 255));
    }

    #[test]
    fn plain_image_is_not_georeferenced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plain.png");
        RgbaImage::new(2, 2).save(&path).unwrap();
        assert!(matches!(
            GeoRaster::load(&path),
            Err(IndexError::NotGeoreferenced(_))
        ));
    }

    #[test]
    fn boxes_intersect() {
        assert!(intersects([0.0, 0.0, 2.0, 2.0], [1.0, 1.0, 3.0, 3.0]));
        assert!(!intersects([0.0, 0.0, 1.0, 1.0], [1.0, 0.0, 2.0, 1.0]));
    }
}
