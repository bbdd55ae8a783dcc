//! Tile types produced by the planner.

use image::RgbaImage;
use serde::Serialize;

/// Geometry of one tile in original image pixels.
///
/// `width` and `height` are extents in the source image; `scale` is the
/// resize factor applied to the pixels before they are sent to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TileRegion {
    /// Index of the tiling row that produced this tile.
    pub row_index: usize,
    pub x_start: u32,
    pub y_start: u32,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl TileRegion {
    pub fn x_end(&self) -> u32 {
        self.x_start + self.width
    }

    pub fn y_end(&self) -> u32 {
        self.y_start + self.height
    }

    /// Whether the tile pixels are resized before inference.
    pub fn is_scaled(&self) -> bool {
        (self.scale - 1.0).abs() > SCALE_EPSILON
    }
}

/// Scale factors closer than this to 1.0 are treated as "no resize".
pub(crate) const SCALE_EPSILON: f32 = 0.001;

/// A cropped (and possibly rescaled) tile ready for dispatch.
///
/// Created by [`TilePlanner::split`](super::TilePlanner::split) and consumed
/// by the dispatch orchestrator.
#[derive(Debug, Clone)]
pub struct Tile {
    region: TileRegion,
    image: RgbaImage,
}

impl Tile {
    pub fn new(region: TileRegion, image: RgbaImage) -> Self {
        Self { region, image }
    }

    /// Pixels sent to the backend (already resized when `scale != 1`).
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn region(&self) -> &TileRegion {
        &self.region
    }

    pub fn x_start(&self) -> u32 {
        self.region.x_start
    }

    pub fn y_start(&self) -> u32 {
        self.region.y_start
    }

    pub fn width(&self) -> u32 {
        self.region.width
    }

    pub fn height(&self) -> u32 {
        self.region.height
    }

    pub fn scale(&self) -> f32 {
        self.region.scale
    }

    pub fn x_end(&self) -> u32 {
        self.region.x_end()
    }

    pub fn y_end(&self) -> u32 {
        self.region.y_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> TileRegion {
        TileRegion {
            row_index: 0,
            x_start: 540,
            y_start: 100,
            width: 460,
            height: 400,
            scale: 1.0,
        }
    }

    #[test]
    fn test_derived_edges() {
        let r = region();
        assert_eq!(r.x_end(), 1000);
        assert_eq!(r.y_end(), 500);
    }

    #[test]
    fn test_is_scaled() {
        let mut r = region();
        assert!(!r.is_scaled());
        r.scale = 1.0005;
        assert!(!r.is_scaled());
        r.scale = 0.5;
        assert!(r.is_scaled());
    }

    #[test]
    fn test_tile_accessors() {
        let tile = Tile::new(region(), RgbaImage::new(460, 400));
        assert_eq!(tile.x_start(), 540);
        assert_eq!(tile.y_start(), 100);
        assert_eq!(tile.width(), 460);
        assert_eq!(tile.height(), 400);
        assert_eq!(tile.x_end(), 1000);
        assert_eq!(tile.y_end(), 500);
        assert_eq!(tile.image().dimensions(), (460, 400));
    }
}
