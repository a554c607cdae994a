//! Map tile addressing.

use std::path::{Path, PathBuf};

use geoindex::georef::ORIGIN_SHIFT;
use geoindex::{IndexError, Result};

pub const MAX_ZOOM: u8 = 30;
pub const MAX_TILE_SIZE: u32 = 4096;
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// One tile in `z/x/y` addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    pub z: u8,
    pub x: u32,
    pub y: u32,
    /// Edge length in pixels. Default 256.
    pub tile_size: u32,
    /// `y` counts from the south (TMS) instead of the north (XYZ).
    pub tms: bool,
    /// Render even when the tile is cached.
    pub force_recreate: bool,
}

impl TileRequest {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self {
            z,
            x,
            y,
            tile_size: DEFAULT_TILE_SIZE,
            tms: false,
            force_recreate: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.z > MAX_ZOOM {
            return Err(IndexError::Validation(format!(
                "zoom {} exceeds {MAX_ZOOM}",
                self.z
            )));
        }
        let count = 1u64 << self.z;
        if u64::from(self.x) >= count || u64::from(self.y) >= count {
            return Err(IndexError::Validation(format!(
                "tile {}/{}/{} does not exist at this zoom",
                self.z, self.x, self.y
            )));
        }
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(IndexError::Validation(format!(
                "tile size must be within 1..={MAX_TILE_SIZE}, got {}",
                self.tile_size
            )));
        }
        Ok(())
    }

    /// Row in XYZ order.
    pub fn xyz_y(&self) -> u32 {
        if self.tms {
            ((1u64 << self.z) - 1 - u64::from(self.y)) as u32
        } else {
            self.y
        }
    }

    /// `[min_x, min_y, max_x, max_y]` in Web Mercator metres.
    pub fn mercator_bounds(&self) -> [f64; 4] {
        let span = 2.0 * ORIGIN_SHIFT / (1u64 << self.z) as f64;
        let min_x = -ORIGIN_SHIFT + f64::from(self.x) * span;
        let max_y = ORIGIN_SHIFT - f64::from(self.xyz_y()) * span;
        [min_x, max_y - span, min_x + span, max_y]
    }

    /// `<base>/<tile_size>/<z>/<x>/<y>[.tms].png`
    pub fn cache_path(&self, base: &Path) -> PathBuf {
        let name = if self.tms {
            format!("{}.tms.png", self.y)
        } else {
            format!("{}.png", self.y)
        };
        base.join(self.tile_size.to_string())
            .join(self.z.to_string())
            .join(self.x.to_string())
            .join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_zero_covers_the_world() {
        let bounds = TileRequest::new(0, 0, 0).mercator_bounds();
        assert_eq!(bounds, [-ORIGIN_SHIFT, -ORIGIN_SHIFT, ORIGIN_SHIFT, ORIGIN_SHIFT]);
    }

    #[test]
    fn tms_flips_rows() {
        let xyz = TileRequest::new(3, 2, 1);
        let tms = TileRequest { y: 6, tms: true, ..xyz };
        assert_eq!(tms.xyz_y(), 1);
        assert_eq!(tms.mercator_bounds(), xyz.mercator_bounds());
        assert_ne!(tms.cache_path(Path::new("c")), xyz.cache_path(Path::new("c")));
    }

    #[test]
    fn rejects_invalid_requests() {
        assert!(TileRequest::new(31, 0, 0).validate().is_err());
        assert!(TileRequest::new(2, 4, 0).validate().is_err());
        let zero = TileRequest { tile_size: 0, ..TileRequest::new(1, 0, 0) };
        assert!(zero.validate().is_err());
        assert!(TileRequest::new(30, (1 << 30) - 1, 0).validate().is_ok());
    }

    #[test]
    fn cache_path_layout() {
        let path = TileRequest::new(5, 17, 11).cache_path(Path::new("/cache/tiles/abc"));
        assert_eq!(path, PathBuf::from("/cache/tiles/abc/256/5/17/11.png"));
    }
}
