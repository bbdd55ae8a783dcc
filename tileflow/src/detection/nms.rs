//! Non-maximum suppression family.
//!
//! Tiles overlap, so an object near a tile boundary is usually reported by
//! more than one backend call. These functions collapse such duplicates:
//!
//! - [`nms`] - classic label-agnostic suppression
//! - [`nms_by_label`] - suppression within each label (default policy)
//! - [`merge_by_label`] - grows the surviving box to the union of its close
//!   neighbours, for objects split across adjacent tiles

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::Detection;

/// Default IoU threshold for suppression.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

/// IoU above which a neighbour is folded into the surviving box.
pub const UNION_IOU_THRESHOLD: f32 = 0.66;

/// IoU above which a folded neighbour is dropped outright.
pub const DISCARD_IOU_THRESHOLD: f32 = 0.85;

/// Intersection over union of two boxes.
///
/// Returns 0 when the union is empty (two degenerate boxes).
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let inter_width = (a.x_max.min(b.x_max) - a.x_min.max(b.x_min)).max(0) as f32;
    let inter_height = (a.y_max.min(b.y_max) - a.y_min.max(b.y_min)).max(0) as f32;
    let inter_area = inter_width * inter_height;

    let union = a.area() + b.area() - inter_area;
    if union <= 0.0 {
        return 0.0;
    }
    inter_area / union
}

/// Label-agnostic non-maximum suppression.
///
/// Repeatedly keeps the most confident remaining box and drops every other
/// box whose IoU with it is at least `threshold`.
pub fn nms(boxes: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    let mut remaining = sorted_by_confidence(boxes);
    let mut kept = Vec::new();

    while !remaining.is_empty() {
        let current = remaining.remove(0);
        remaining.retain(|b| iou(&current, b) < threshold);
        kept.push(current);
    }

    kept
}

/// Non-maximum suppression applied independently within each label.
///
/// Labels are processed in order of first appearance.
pub fn nms_by_label(boxes: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    group_by_label(boxes)
        .into_iter()
        .flat_map(|group| nms(group, threshold))
        .collect()
}

/// Per-label merge that replaces clusters of overlapping boxes with their
/// union.
///
/// For each label the most confident box is taken as `current`. Remaining
/// boxes with IoU above [`UNION_IOU_THRESHOLD`] form its group. If the group
/// is non-empty, boxes above [`DISCARD_IOU_THRESHOLD`] are removed from
/// further consideration and `current` grows to cover itself and the whole
/// group, taking the highest confidence among them.
pub fn merge_by_label(boxes: Vec<Detection>) -> Vec<Detection> {
    let mut result = Vec::new();

    for group in group_by_label(boxes) {
        let mut remaining = sorted_by_confidence(group);

        while !remaining.is_empty() {
            let mut current = remaining.remove(0);

            let neighbours: Vec<Detection> = remaining
                .iter()
                .filter(|b| iou(b, &current) > UNION_IOU_THRESHOLD)
                .cloned()
                .collect();

            if !neighbours.is_empty() {
                remaining.retain(|b| iou(b, &current) <= DISCARD_IOU_THRESHOLD);
                for n in &neighbours {
                    current.x_min = current.x_min.min(n.x_min);
                    current.y_min = current.y_min.min(n.y_min);
                    current.x_max = current.x_max.max(n.x_max);
                    current.y_max = current.y_max.max(n.y_max);
                    current.confidence = current.confidence.max(n.confidence);
                }
            }

            result.push(current);
        }
    }

    result
}

/// How overlapping detections from different tiles are consolidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// [`nms`] across all labels.
    Global,
    /// [`nms_by_label`].
    #[default]
    PerLabel,
    /// [`merge_by_label`] (ignores the IoU threshold).
    PerLabelUnion,
}

impl MergePolicy {
    pub fn apply(&self, boxes: Vec<Detection>, threshold: f32) -> Vec<Detection> {
        match self {
            MergePolicy::Global => nms(boxes, threshold),
            MergePolicy::PerLabel => nms_by_label(boxes, threshold),
            MergePolicy::PerLabelUnion => merge_by_label(boxes),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergePolicy::Global => "global",
            MergePolicy::PerLabel => "per_label",
            MergePolicy::PerLabelUnion => "per_label_union",
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "global" => Ok(MergePolicy::Global),
            "per_label" => Ok(MergePolicy::PerLabel),
            "per_label_union" => Ok(MergePolicy::PerLabelUnion),
            other => Err(format!(
                "unknown merge policy '{}' (expected global, per_label or per_label_union)",
                other
            )),
        }
    }
}

fn sorted_by_confidence(mut boxes: Vec<Detection>) -> Vec<Detection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    boxes
}

fn group_by_label(boxes: Vec<Detection>) -> Vec<Vec<Detection>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<Detection>> = Vec::new();

    for detection in boxes {
        match index.get(&detection.label) {
            Some(&i) => groups[i].push(detection),
            None => {
                index.insert(detection.label.clone(), groups.len());
                groups.push(vec![detection]);
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn det(label: &str, confidence: f32, x0: i32, y0: i32, x1: i32, y1: i32) -> Detection {
        Detection::new(label, confidence, x0, y0, x1, y1)
    }

    #[test]
    fn test_iou_identical() {
        let a = det("a", 0.9, 0, 0, 10, 10);
        assert_eq!(iou(&a, &a), 1.0);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = det("a", 0.9, 0, 0, 10, 10);
        let b = det("a", 0.9, 20, 20, 30, 30);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_touching_edges() {
        let a = det("a", 0.9, 0, 0, 10, 10);
        let b = det("a", 0.9, 10, 0, 20, 10);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_partial() {
        let a = det("a", 0.9, 0, 0, 10, 10);
        let b = det("a", 0.9, 5, 0, 15, 10);
        // 50 / (100 + 100 - 50)
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_degenerate_boxes() {
        let a = det("a", 0.9, 5, 5, 5, 5);
        let b = det("a", 0.9, 5, 5, 5, 5);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_nms_keeps_highest_confidence() {
        let boxes = vec![
            det("car", 0.6, 0, 0, 100, 100),
            det("car", 0.9, 5, 5, 100, 100),
            det("car", 0.8, 500, 500, 600, 600),
        ];
        let kept = nms(boxes, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.8);
    }

    #[test]
    fn test_nms_is_label_agnostic() {
        let boxes = vec![
            det("car", 0.9, 0, 0, 100, 100),
            det("truck", 0.8, 0, 0, 100, 100),
        ];
        assert_eq!(nms(boxes, 0.5).len(), 1);
    }

    #[test]
    fn test_nms_threshold_is_inclusive() {
        let boxes = vec![
            det("car", 0.9, 0, 0, 10, 10),
            det("car", 0.8, 0, 0, 10, 10),
        ];
        assert_eq!(nms(boxes.clone(), 1.0).len(), 1);
        assert_eq!(nms(boxes, 1.01).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.5).is_empty());
        assert!(nms_by_label(Vec::new(), 0.5).is_empty());
        assert!(merge_by_label(Vec::new()).is_empty());
    }

    #[test]
    fn test_nms_by_label_keeps_overlapping_different_labels() {
        let boxes = vec![
            det("car", 0.9, 0, 0, 100, 100),
            det("truck", 0.8, 0, 0, 100, 100),
            det("car", 0.7, 2, 2, 100, 100),
        ];
        let kept = nms_by_label(boxes, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].label, "car");
        assert_eq!(kept[1].label, "truck");
    }

    #[test]
    fn test_merge_unions_split_object() {
        // Two halves of one object reported by neighbouring tiles.
        let boxes = vec![
            det("bus", 0.7, 0, 0, 100, 100),
            det("bus", 0.9, 10, 0, 110, 100),
        ];
        let merged = merge_by_label(boxes);
        assert_eq!(merged.len(), 2);
        // IoU = 90*100 / (2*10000 - 9000) ≈ 0.818: unioned but not discarded.
        assert_eq!(
            (merged[0].x_min, merged[0].y_min, merged[0].x_max, merged[0].y_max),
            (0, 0, 110, 100)
        );
        assert_eq!(merged[0].confidence, 0.9);
    }

    #[test]
    fn test_merge_discards_near_duplicates() {
        let boxes = vec![
            det("bus", 0.9, 0, 0, 100, 100),
            det("bus", 0.8, 0, 0, 100, 98),
            det("bus", 0.5, 400, 400, 500, 500),
        ];
        let merged = merge_by_label(boxes);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            (merged[0].x_min, merged[0].y_min, merged[0].x_max, merged[0].y_max),
            (0, 0, 100, 100)
        );
        assert_eq!(merged[1].x_min, 400);
    }

    #[test]
    fn test_merge_leaves_distant_boxes_untouched() {
        let boxes = vec![
            det("cat", 0.9, 0, 0, 10, 10),
            det("cat", 0.8, 8, 0, 18, 10),
        ];
        let merged = merge_by_label(boxes.clone());
        assert_eq!(merged, boxes);
    }

    #[test]
    fn test_merge_policy_dispatch() {
        let boxes = vec![
            det("car", 0.9, 0, 0, 100, 100),
            det("truck", 0.8, 0, 0, 100, 100),
        ];
        assert_eq!(MergePolicy::Global.apply(boxes.clone(), 0.5).len(), 1);
        assert_eq!(MergePolicy::PerLabel.apply(boxes.clone(), 0.5).len(), 2);
        assert_eq!(MergePolicy::PerLabelUnion.apply(boxes, 0.5).len(), 2);
        assert_eq!(MergePolicy::default(), MergePolicy::PerLabel);
    }

    #[test]
    fn test_merge_policy_parse() {
        assert_eq!("global".parse::<MergePolicy>(), Ok(MergePolicy::Global));
        assert_eq!("per-label".parse::<MergePolicy>(), Ok(MergePolicy::PerLabel));
        assert_eq!(
            "Per_Label_Union".parse::<MergePolicy>(),
            Ok(MergePolicy::PerLabelUnion)
        );
        assert!("fancy".parse::<MergePolicy>().is_err());
        assert_eq!(MergePolicy::PerLabelUnion.to_string(), "per_label_union");
    }

    fn arb_detection() -> impl Strategy<Value = Detection> {
        (
            prop::sample::select(vec!["car", "person", "dog"]),
            0.0f32..=1.0,
            0i32..200,
            0i32..200,
            0i32..80,
            0i32..80,
        )
            .prop_map(|(label, confidence, x, y, w, h)| det(label, confidence, x, y, x + w, y + h))
    }

    proptest! {
        #[test]
        fn prop_iou_symmetric_and_bounded(a in arb_detection(), b in arb_detection()) {
            let ab = iou(&a, &b);
            prop_assert_eq!(ab, iou(&b, &a));
            prop_assert!((0.0..=1.0).contains(&ab));
        }

        #[test]
        fn prop_nms_output_is_subset(
            boxes in prop::collection::vec(arb_detection(), 0..40),
            threshold in 0.1f32..0.9,
        ) {
            let kept = nms_by_label(boxes.clone(), threshold);
            prop_assert!(kept.len() <= boxes.len());
            for k in &kept {
                prop_assert!(boxes.contains(k));
            }
        }

        #[test]
        fn prop_nms_by_label_suppresses_overlaps(
            boxes in prop::collection::vec(arb_detection(), 0..40),
            threshold in 0.1f32..0.9,
        ) {
            let kept = nms_by_label(boxes, threshold);
            for (i, a) in kept.iter().enumerate() {
                for b in kept.iter().skip(i + 1) {
                    if a.label == b.label {
                        prop_assert!(iou(a, b) < threshold);
                    }
                }
            }
        }

        #[test]
        fn prop_global_nms_suppresses_all_overlaps(
            boxes in prop::collection::vec(arb_detection(), 0..40),
            threshold in 0.1f32..0.9,
        ) {
            let kept = nms(boxes.clone(), threshold);
            prop_assert!(kept.len() <= boxes.len());
            for (i, a) in kept.iter().enumerate() {
                for b in kept.iter().skip(i + 1) {
                    prop_assert!(iou(a, b) < threshold);
                }
            }
        }
    }
}
