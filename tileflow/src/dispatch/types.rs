//! Dispatch options and results.

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::backend::{BackendError, ModuleInfo};
use crate::detection::{Detection, MergePolicy, DEFAULT_IOU_THRESHOLD};

/// Default minimum confidence for a detection to be kept.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.4;

/// Per-request dispatch settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchOptions {
    /// Detections below this confidence are dropped before merging.
    pub min_confidence: f32,
    /// IoU above which two boxes are considered duplicates.
    pub iou_threshold: f32,
    pub merge_policy: MergePolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            merge_policy: MergePolicy::default(),
        }
    }
}

impl DispatchOptions {
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }
}

/// What happened to one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    /// A backend answered.
    Served,
    /// The chosen backend failed.
    Failed,
    /// No backend was active.
    Unserved,
}

/// Start and end of one backend call.
#[derive(Debug, Clone, Copy)]
pub struct CallInterval {
    pub start: Instant,
    pub end: Instant,
}

/// Result of processing one tile.
#[derive(Debug, Clone)]
pub struct TileOutcome {
    pub status: TileStatus,
    pub backend: Option<String>,
    /// Full-image detections that passed the confidence filter.
    pub detections: Vec<Detection>,
    pub module: Option<ModuleInfo>,
    pub call: Option<CallInterval>,
}

impl TileOutcome {
    pub(crate) fn unserved() -> Self {
        Self {
            status: TileStatus::Unserved,
            backend: None,
            detections: Vec::new(),
            module: None,
            call: None,
        }
    }
}

/// Distinct model metadata reported by the backends of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub module_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub module_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inference_devices: Vec<String>,
}

impl ModuleSummary {
    /// Add the values of `info` not seen yet, keeping first-seen order.
    pub fn record(&mut self, info: &ModuleInfo) {
        fn push(values: &mut Vec<String>, value: &Option<String>) {
            if let Some(value) = value {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
        push(&mut self.module_ids, &info.module_id);
        push(&mut self.module_names, &info.module_name);
        push(&mut self.inference_devices, &info.inference_device);
    }

    pub fn is_empty(&self) -> bool {
        self.module_ids.is_empty()
            && self.module_names.is_empty()
            && self.inference_devices.is_empty()
    }
}

/// Why an untiled request produced no result.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("no backend available")]
    NoBackendAvailable,

    #[error("backend {backend} failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: BackendError,
    },
}

/// Merged detections and timing for one image.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub detections: Vec<Detection>,
    pub tile_count: usize,
    pub served_tiles: usize,
    pub failed_tiles: usize,
    pub unserved_tiles: usize,
    /// Wall time during which at least one backend call was running.
    pub inference_ms: u64,
    /// Time spent merging after the last tile finished.
    pub processing_ms: u64,
    /// Total time from dispatch to merged result.
    pub round_trip_ms: u64,
    /// Distinct backends that served a tile, in order of first appearance.
    pub backends: Vec<String>,
    /// `None` when the detections were returned unmerged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_policy: Option<MergePolicy>,
    #[serde(flatten)]
    pub modules: ModuleSummary,
}

impl AggregateResult {
    /// Distinct labels in the merged result, in order of first appearance.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for detection in &self.detections {
            if !labels.contains(&detection.label.as_str()) {
                labels.push(&detection.label);
            }
        }
        labels
    }

    /// One-line human summary, e.g. `Found car, person`.
    pub fn summary(&self) -> String {
        let labels = self.labels();
        if labels.is_empty() {
            "No objects found".to_string()
        } else {
            format!("Found {}", labels.join(", "))
        }
    }

    /// Whether every tile was served.
    pub fn is_complete(&self) -> bool {
        self.served_tiles == self.tile_count
    }
}

/// Total length of the union of possibly overlapping intervals.
///
/// Concurrent calls are counted once, so this measures how long the image
/// was actually waiting on backends.
pub fn busy_time(intervals: &[CallInterval]) -> Duration {
    let mut sorted: Vec<CallInterval> = intervals.to_vec();
    sorted.sort_by_key(|i| i.start);

    let mut total = Duration::ZERO;
    let mut current: Option<CallInterval> = None;
    for interval in sorted {
        current = match current {
            Some(mut open) if interval.start <= open.end => {
                open.end = open.end.max(interval.end);
                Some(open)
            }
            Some(open) => {
                total += open.end.saturating_duration_since(open.start);
                Some(interval)
            }
            None => Some(interval),
        };
    }
    if let Some(open) = current {
        total += open.end.saturating_duration_since(open.start);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(base: Instant, start_ms: u64, end_ms: u64) -> CallInterval {
        CallInterval {
            start: base + Duration::from_millis(start_ms),
            end: base + Duration::from_millis(end_ms),
        }
    }

    #[test]
    fn test_busy_time_merges_overlaps() {
        let base = Instant::now();
        let intervals = [span(base, 0, 100), span(base, 50, 150), span(base, 300, 400)];
        assert_eq!(busy_time(&intervals), Duration::from_millis(250));
    }

    #[test]
    fn test_busy_time_nested_and_unsorted() {
        let base = Instant::now();
        let intervals = [span(base, 20, 30), span(base, 0, 100), span(base, 100, 120)];
        assert_eq!(busy_time(&intervals), Duration::from_millis(120));
    }

    #[test]
    fn test_busy_time_empty() {
        assert_eq!(busy_time(&[]), Duration::ZERO);
    }

    fn result(labels: &[&str]) -> AggregateResult {
        AggregateResult {
            detections: labels
                .iter()
                .map(|l| Detection::new(*l, 0.9, 0, 0, 1, 1))
                .collect(),
            tile_count: 2,
            served_tiles: 2,
            failed_tiles: 0,
            unserved_tiles: 0,
            inference_ms: 0,
            processing_ms: 0,
            round_trip_ms: 0,
            backends: Vec::new(),
            merge_policy: Some(MergePolicy::PerLabel),
            modules: ModuleSummary::default(),
        }
    }

    #[test]
    fn test_summary() {
        assert_eq!(result(&["car", "person", "car"]).summary(), "Found car, person");
        assert_eq!(result(&[]).summary(), "No objects found");
    }

    #[test]
    fn test_module_summary_keeps_distinct_values() {
        let gpu = ModuleInfo {
            module_id: Some("yolo".to_string()),
            module_name: None,
            inference_device: Some("GPU".to_string()),
        };
        let cpu = ModuleInfo {
            inference_device: Some("CPU".to_string()),
            ..gpu.clone()
        };

        let mut summary = ModuleSummary::default();
        assert!(summary.is_empty());
        summary.record(&gpu);
        summary.record(&cpu);
        summary.record(&gpu);

        assert_eq!(summary.module_ids, vec!["yolo"]);
        assert!(summary.module_names.is_empty());
        assert_eq!(summary.inference_devices, vec!["GPU", "CPU"]);

        let mut with_modules = result(&["car"]);
        with_modules.modules = summary;
        let json = serde_json::to_value(&with_modules).unwrap();
        assert_eq!(json["inference_devices"], serde_json::json!(["GPU", "CPU"]));
        assert!(json.get("module_names").is_none());
    }

    #[test]
    fn test_defaults() {
        let options = DispatchOptions::default();
        assert_eq!(options.iou_threshold, 0.5);
        assert_eq!(options.merge_policy, MergePolicy::PerLabel);
        assert!(result(&[]).is_complete());
    }
}
