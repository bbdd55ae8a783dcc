//! Tiling configuration types.
//!
//! A [`TilingConfig`] is a named set of [`TileRow`]s. Each row describes one
//! horizontal band of the source image and how it is cut into overlapping
//! tiles. Configurations are validated once in [`TilingConfig::new`] and are
//! immutable afterwards.

use serde::Serialize;

use crate::config::ConfigError;

/// Overlap factors must stay strictly below this value so that the stride
/// between tiles remains positive.
pub const MAX_OVERLAP_FACTOR: f64 = 0.5;

/// One horizontal band of a tiling configuration.
///
/// # Example
///
/// ```
/// use tileflow::tiling::TileRow;
///
/// let row = TileRow::new(0, 500, 600, 0.1, 600);
/// assert_eq!(row.stride_pixels(), 480);
/// assert_eq!(row.overlap_pixels(), 60);
/// assert_eq!(row.step_pixels(), 540);
/// assert!((row.scale() - 1.0).abs() < f32::EPSILON);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileRow {
    y_start: u32,
    row_height: u32,
    tile_width: u32,
    overlap_factor: f64,
    scale_width: u32,
    x_start_percent: Option<f64>,
    x_end_percent: Option<f64>,
}

impl TileRow {
    /// Create a row spanning the full image width.
    ///
    /// # Arguments
    ///
    /// * `y_start` - Top edge of the band in source pixels
    /// * `row_height` - Height of the band in source pixels
    /// * `tile_width` - Nominal tile width in source pixels
    /// * `overlap_factor` - Fraction of the tile width shared with neighbours
    /// * `scale_width` - Width a tile is resized to before inference
    pub fn new(
        y_start: u32,
        row_height: u32,
        tile_width: u32,
        overlap_factor: f64,
        scale_width: u32,
    ) -> Self {
        Self {
            y_start,
            row_height,
            tile_width,
            overlap_factor,
            scale_width,
            x_start_percent: None,
            x_end_percent: None,
        }
    }

    /// Restrict the row to a fraction of the image width.
    ///
    /// Either bound may be `None` to keep the image edge.
    pub fn with_x_span(mut self, start_percent: Option<f64>, end_percent: Option<f64>) -> Self {
        self.x_start_percent = start_percent;
        self.x_end_percent = end_percent;
        self
    }

    pub fn y_start(&self) -> u32 {
        self.y_start
    }

    pub fn row_height(&self) -> u32 {
        self.row_height
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn overlap_factor(&self) -> f64 {
        self.overlap_factor
    }

    pub fn scale_width(&self) -> u32 {
        self.scale_width
    }

    pub fn x_start_percent(&self) -> Option<f64> {
        self.x_start_percent
    }

    pub fn x_end_percent(&self) -> Option<f64> {
        self.x_end_percent
    }

    /// Resize factor applied to tiles of this row before inference.
    pub fn scale(&self) -> f32 {
        self.scale_width as f32 / self.tile_width as f32
    }

    /// Portion of a tile not shared with either neighbour.
    pub fn stride_pixels(&self) -> u32 {
        (self.tile_width as f64 * (1.0 - 2.0 * self.overlap_factor)) as u32
    }

    /// Pixels shared with the neighbouring tile on one side.
    pub fn overlap_pixels(&self) -> u32 {
        (self.tile_width as f64 * self.overlap_factor) as u32
    }

    /// Distance between consecutive tile origins.
    ///
    /// Never zero, even for degenerate tiny tiles.
    pub fn step_pixels(&self) -> u32 {
        (self.stride_pixels() + self.overlap_pixels()).max(1)
    }

    /// Horizontal span `[start, end)` this row covers in an image of the
    /// given width.
    pub fn x_span(&self, image_width: u32) -> (u32, u32) {
        let start = self
            .x_start_percent
            .map(|p| (image_width as f64 * p).floor() as u32)
            .unwrap_or(0)
            .min(image_width);
        let end = self
            .x_end_percent
            .map(|p| (image_width as f64 * p).ceil() as u32)
            .unwrap_or(image_width)
            .min(image_width);
        (start, end)
    }

    fn validate(&self, plan: &str, index: usize) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTileRow {
            plan: plan.to_string(),
            row: index,
            reason,
        };

        if self.row_height == 0 {
            return Err(invalid("height must be positive".to_string()));
        }
        if self.tile_width == 0 {
            return Err(invalid("width must be positive".to_string()));
        }
        if self.scale_width == 0 {
            return Err(invalid("scale width must be positive".to_string()));
        }
        if !(0.0..MAX_OVERLAP_FACTOR).contains(&self.overlap_factor) {
            return Err(invalid(format!(
                "overlap factor {} out of range (must be >= 0 and < {})",
                self.overlap_factor, MAX_OVERLAP_FACTOR
            )));
        }
        if let Some(start) = self.x_start_percent {
            if !(0.0..1.0).contains(&start) {
                return Err(invalid(format!(
                    "x start percent {} must be >= 0 and < 1",
                    start
                )));
            }
        }
        if let Some(end) = self.x_end_percent {
            if end <= 0.0 || end > 1.0 {
                return Err(invalid(format!("x end percent {} must be > 0 and <= 1", end)));
            }
        }
        if let (Some(start), Some(end)) = (self.x_start_percent, self.x_end_percent) {
            if start >= end {
                return Err(invalid(format!(
                    "x start percent {} must be less than x end percent {}",
                    start, end
                )));
            }
        }
        Ok(())
    }
}

/// A named tiling plan made of one or more rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TilingConfig {
    id: u32,
    name: String,
    expected_size: Option<(u32, u32)>,
    rows: Vec<TileRow>,
}

impl TilingConfig {
    /// Create and validate a tiling configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the plan has no rows or any row has a
    /// non-positive dimension, an overlap factor outside `[0, 0.5)`, or an
    /// inconsistent horizontal span.
    pub fn new(id: u32, name: impl Into<String>, rows: Vec<TileRow>) -> Result<Self, ConfigError> {
        let name = name.into();
        if rows.is_empty() {
            return Err(ConfigError::EmptyPlan(name));
        }
        for (index, row) in rows.iter().enumerate() {
            row.validate(&name, index)?;
        }
        Ok(Self {
            id,
            name,
            expected_size: None,
            rows,
        })
    }

    /// Record the image size this plan was designed for.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPlan`] if either dimension is zero.
    pub fn with_expected_size(mut self, width: u32, height: u32) -> Result<Self, ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidPlan {
                plan: self.name,
                reason: "expected image width and height must be positive".to_string(),
            });
        }
        self.expected_size = Some((width, height));
        Ok(self)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expected_size(&self) -> Option<(u32, u32)> {
        self.expected_size
    }

    pub fn rows(&self) -> &[TileRow] {
        &self.rows
    }
}
