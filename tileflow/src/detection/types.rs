//! Detection record shared by backends, remapping and merging.

use serde::{Deserialize, Serialize};

/// A single labelled bounding box.
///
/// Coordinates are integer pixels. Depending on where a detection is in the
/// pipeline they are relative to a batch image, a tile, or the full image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub confidence: f32,
    pub label: String,
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
    /// Which image of a tensor batch produced this detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
    /// Name of the backend that served the call.
    #[serde(default)]
    pub backend: String,
}

impl Detection {
    pub fn new(
        label: impl Into<String>,
        confidence: f32,
        x_min: i32,
        y_min: i32,
        x_max: i32,
        y_max: i32,
    ) -> Self {
        Self {
            confidence,
            label: label.into(),
            x_min,
            y_min,
            x_max,
            y_max,
            batch_index: None,
            backend: String::new(),
        }
    }

    pub fn width(&self) -> i32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> i32 {
        self.y_max - self.y_min
    }

    /// Box area; degenerate or inverted boxes report their signed area.
    pub fn area(&self) -> f32 {
        self.width() as f32 * self.height() as f32
    }

    /// Shift the box by a pixel offset.
    pub fn offset(&mut self, dx: i32, dy: i32) {
        self.x_min += dx;
        self.x_max += dx;
        self.y_min += dy;
        self.y_max += dy;
    }

    /// Multiply every coordinate by `factor`, truncating toward zero.
    pub fn scale(&mut self, factor: f32) {
        self.x_min = (self.x_min as f32 * factor) as i32;
        self.x_max = (self.x_max as f32 * factor) as i32;
        self.y_min = (self.y_min as f32 * factor) as i32;
        self.y_max = (self.y_max as f32 * factor) as i32;
    }

    /// Offset first, then scale.
    pub fn offset_and_scale(&mut self, dx: i32, dy: i32, factor: f32) {
        self.offset(dx, dy);
        self.scale(factor);
    }
}
