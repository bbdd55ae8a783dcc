//! Tile-local to full-image coordinate mapping.

use super::Detection;
use crate::tiling::TileRegion;

/// Map a detection from tile pixels into full-image pixels.
///
/// Each coordinate is divided by the tile scale (undoing the resize), offset
/// by the tile origin and clamped into `[0, image_width] x [0, image_height]`.
/// Label, confidence, batch index and backend name are carried over.
///
/// # Example
///
/// ```
/// use tileflow::detection::{remap, Detection};
/// use tileflow::tiling::TileRegion;
///
/// let tile = TileRegion { row_index: 0, x_start: 540, y_start: 0, width: 460, height: 500, scale: 0.5 };
/// let local = Detection::new("car", 0.8, 10, 20, 100, 120);
/// let full = remap(&local, &tile, 1000, 500);
/// assert_eq!((full.x_min, full.y_min, full.x_max, full.y_max), (560, 40, 740, 240));
/// ```
pub fn remap(
    detection: &Detection,
    tile: &TileRegion,
    image_width: u32,
    image_height: u32,
) -> Detection {
    let inverse = 1.0 / tile.scale;
    let map_x = |x: i32| {
        let full = (x as f32 * inverse) as i64 + tile.x_start as i64;
        full.clamp(0, image_width as i64) as i32
    };
    let map_y = |y: i32| {
        let full = (y as f32 * inverse) as i64 + tile.y_start as i64;
        full.clamp(0, image_height as i64) as i32
    };

    Detection {
        x_min: map_x(detection.x_min),
        y_min: map_y(detection.y_min),
        x_max: map_x(detection.x_max),
        y_max: map_y(detection.y_max),
        ..detection.clone()
    }
}

/// Map every detection of one tile.
pub fn remap_all<'a>(
    detections: impl IntoIterator<Item = &'a Detection>,
    tile: &TileRegion,
    image_width: u32,
    image_height: u32,
) -> Vec<Detection> {
    detections
        .into_iter()
        .map(|d| remap(d, tile, image_width, image_height))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(x_start: u32, y_start: u32, scale: f32) -> TileRegion {
        TileRegion {
            row_index: 0,
            x_start,
            y_start,
            width: 600,
            height: 500,
            scale,
        }
    }

    #[test]
    fn test_identity_scale_offsets_only() {
        let d = Detection::new("car", 0.7, 10, 20, 30, 40);
        let mapped = remap(&d, &tile(100, 200, 1.0), 2000, 2000);
        assert_eq!(
            (mapped.x_min, mapped.y_min, mapped.x_max, mapped.y_max),
            (110, 220, 130, 240)
        );
    }

    #[test]
    fn test_downscaled_tile_expands_box() {
        let d = Detection::new("car", 0.7, 10, 20, 30, 40);
        let mapped = remap(&d, &tile(0, 0, 0.5), 2000, 2000);
        assert_eq!(
            (mapped.x_min, mapped.y_min, mapped.x_max, mapped.y_max),
            (20, 40, 60, 80)
        );
    }

    #[test]
    fn test_clamps_to_image_bounds() {
        let d = Detection::new("car", 0.7, -50, -5, 700, 900);
        let mapped = remap(&d, &tile(500, 0, 1.0), 1000, 500);
        assert_eq!(mapped.x_min, 450);
        assert_eq!(mapped.y_min, 0);
        assert_eq!(mapped.x_max, 1000);
        assert_eq!(mapped.y_max, 500);
    }

    #[test]
    fn test_metadata_passes_through() {
        let mut d = Detection::new("dog", 0.42, 1, 1, 2, 2);
        d.batch_index = Some(3);
        d.backend = "gpu-a".to_string();
        let mapped = remap(&d, &tile(0, 0, 1.0), 10, 10);
        assert_eq!(mapped.label, "dog");
        assert_eq!(mapped.confidence, 0.42);
        assert_eq!(mapped.batch_index, Some(3));
        assert_eq!(mapped.backend, "gpu-a");
    }

    #[test]
    fn test_remap_all() {
        let detections = vec![
            Detection::new("a", 0.9, 0, 0, 10, 10),
            Detection::new("b", 0.8, 5, 5, 15, 15),
        ];
        let mapped = remap_all(&detections, &tile(100, 0, 1.0), 1000, 1000);
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].x_min, 100);
        assert_eq!(mapped[1].x_max, 115);
    }
}
