//! Detections: the record type, coordinate remapping and merging.

mod nms;
mod remap;
mod types;

pub use nms::{
    iou, merge_by_label, nms, nms_by_label, MergePolicy, DEFAULT_IOU_THRESHOLD,
    DISCARD_IOU_THRESHOLD, UNION_IOU_THRESHOLD,
};
pub use remap::{remap, remap_all};
pub use types::Detection;
