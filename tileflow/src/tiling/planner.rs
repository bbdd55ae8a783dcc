//! Tile planning: from image size and tiling plan to tile regions.
//!
//! Each row is processed independently (rows are split in parallel with
//! rayon); the output keeps row order and left-to-right order within a row.
//!
//! # Row Geometry
//!
//! ```text
//!  x=0          step          2*step
//!   ├────────────┼──────────────┼─────────...
//!   [ tile 0 (tile_width)  ]
//!                [ tile 1 (tile_width)  ]
//!                          ◄──►
//!                        overlap
//!
//!  step = trunc(tile_width * (1 - 2f)) + trunc(tile_width * f)
//! ```
//!
//! The last tile in a row is clamped to the remaining width. When a row is
//! rescaled, every tile (including the clamped edge tile) is resized to the
//! row's nominal `tile_width x row_height` times the scale, so edge tiles
//! are stretched horizontally.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use rayon::prelude::*;

use super::{Tile, TileRegion, TileRow, TilingConfig};

/// Splits images into tiles according to an immutable [`TilingConfig`].
///
/// # Example
///
/// ```
/// use tileflow::tiling::{TilePlanner, TileRow, TilingConfig};
///
/// let config = TilingConfig::new(1, "single-row", vec![TileRow::new(0, 500, 600, 0.1, 600)])
///     .unwrap();
/// let planner = TilePlanner::new(config);
///
/// let regions = planner.regions(1000, 500);
/// assert_eq!(regions.len(), 2);
/// assert_eq!((regions[0].x_start, regions[0].width), (0, 600));
/// assert_eq!((regions[1].x_start, regions[1].width), (540, 460));
/// ```
#[derive(Debug, Clone)]
pub struct TilePlanner {
    config: TilingConfig,
}

impl TilePlanner {
    pub fn new(config: TilingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    /// Compute tile geometry for an image of the given size without touching
    /// any pixels.
    pub fn regions(&self, image_width: u32, image_height: u32) -> Vec<TileRegion> {
        self.check_expected_size(image_width, image_height);

        self.config
            .rows()
            .par_iter()
            .enumerate()
            .flat_map_iter(|(index, row)| row_regions(index, row, image_width, image_height))
            .collect()
    }

    /// Crop (and rescale where configured) the image into tiles.
    pub fn split(&self, image: &RgbaImage) -> Vec<Tile> {
        let (image_width, image_height) = image.dimensions();
        self.check_expected_size(image_width, image_height);

        let tiles: Vec<Tile> = self
            .config
            .rows()
            .par_iter()
            .enumerate()
            .flat_map_iter(|(index, row)| {
                row_regions(index, row, image_width, image_height)
                    .into_iter()
                    .map(move |region| Tile::new(region, crop_region(image, row, &region)))
            })
            .collect();

        tracing::debug!(
            plan = self.config.name(),
            image_width,
            image_height,
            tiles = tiles.len(),
            "Split image into tiles"
        );

        tiles
    }

    fn check_expected_size(&self, image_width: u32, image_height: u32) {
        if let Some((expected_width, expected_height)) = self.config.expected_size() {
            if (expected_width, expected_height) != (image_width, image_height) {
                tracing::warn!(
                    plan = self.config.name(),
                    expected = format!("{}x{}", expected_width, expected_height),
                    actual = format!("{}x{}", image_width, image_height),
                    "Image size differs from the size the tiling plan was designed for"
                );
            }
        }
    }
}

/// Regions for one row, left to right.
fn row_regions(
    row_index: usize,
    row: &TileRow,
    image_width: u32,
    image_height: u32,
) -> Vec<TileRegion> {
    if row.y_start() >= image_height {
        return Vec::new();
    }

    let (span_start, span_end) = row.x_span(image_width);
    let height = row.row_height().min(image_height - row.y_start());
    let step = row.step_pixels();
    let scale = row.scale();

    let mut regions = Vec::new();
    let mut x = span_start;
    while x < span_end {
        regions.push(TileRegion {
            row_index,
            x_start: x,
            y_start: row.y_start(),
            width: row.tile_width().min(span_end - x),
            height,
            scale,
        });
        x = x.saturating_add(step);
    }
    regions
}

fn crop_region(image: &RgbaImage, row: &TileRow, region: &TileRegion) -> RgbaImage {
    let cropped = imageops::crop_imm(
        image,
        region.x_start,
        region.y_start,
        region.width,
        region.height,
    )
    .to_image();

    if !region.is_scaled() {
        return cropped;
    }

    // Nominal size on purpose: clamped edge tiles get stretched.
    let target_width = ((row.tile_width() as f32 * region.scale) as u32).max(1);
    let target_height = ((row.row_height() as f32 * region.scale) as u32).max(1);
    imageops::resize(&cropped, target_width, target_height, FilterType::Triangle)
}
