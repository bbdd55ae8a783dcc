//! Tensor-inference protocol.
//!
//! A batch of equally sized images is packed into one dense FP32 tensor
//! (shape `[batch, 3, height, width]`, channel-major, values in `[0, 1]`)
//! and posted as JSON. The backend answers with its raw output tensors;
//! the first one is decoded as YOLO-style predictions:
//!
//! ```text
//! output shape [batch, features, boxes]
//!
//! feature 0..4    cx, cy, w, h     (pixels of the batch image)
//! feature 4..     per-class scores (class id = feature - 4)
//! ```

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::http::AsyncHttpClient;
use super::types::{
    BackendError, BatchItem, BoxFuture, InferenceOutput, InferenceProtocol, ModuleInfo,
    ProtocolKind,
};
use crate::detection::Detection;

/// Name of the input tensor in requests.
pub const INPUT_NAME: &str = "images";

/// Datatype tag of the input tensor.
pub const INPUT_DATATYPE: &str = "FP32";

/// Number of box geometry features preceding the class scores.
const BOX_FEATURES: usize = 4;

/// Request document.
#[derive(Debug, Clone, Serialize)]
pub struct TensorRequest {
    pub inputs: Vec<TensorInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TensorInput {
    pub name: String,
    pub datatype: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Response document.
#[derive(Debug, Clone, Deserialize)]
pub struct TensorResponse {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub outputs: Vec<TensorOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TensorOutput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub datatype: String,
    #[serde(default)]
    pub shape: Vec<i64>,
    #[serde(default)]
    pub data: Vec<f32>,
}

/// Check that every batch image has the size of the first.
pub fn check_shapes(batch: &[BatchItem<'_>]) -> Result<(u32, u32), BackendError> {
    let first = batch.first().ok_or(BackendError::EmptyBatch)?;
    let (expected_width, expected_height) = first.image.dimensions();

    for (index, item) in batch.iter().enumerate().skip(1) {
        let (width, height) = item.image.dimensions();
        if (width, height) != (expected_width, expected_height) {
            return Err(BackendError::ShapeMismatch {
                index,
                width,
                height,
                expected_width,
                expected_height,
            });
        }
    }
    Ok((expected_width, expected_height))
}

/// Pack a batch into the request tensor.
///
/// Alpha is dropped; each colour channel becomes its own plane.
pub fn build_request(batch: &[BatchItem<'_>]) -> Result<TensorRequest, BackendError> {
    let (width, height) = check_shapes(batch)?;
    let plane = width as usize * height as usize;
    let per_image = 3 * plane;
    let mut data = vec![0.0f32; batch.len() * per_image];

    data.par_chunks_mut(per_image.max(1))
        .zip(batch.par_iter())
        .for_each(|(chunk, item)| {
            for (x, y, pixel) in item.image.enumerate_pixels() {
                let offset = y as usize * width as usize + x as usize;
                for channel in 0..3 {
                    chunk[channel * plane + offset] = pixel[channel] as f32 / 255.0;
                }
            }
        });

    Ok(TensorRequest {
        inputs: vec![TensorInput {
            name: INPUT_NAME.to_string(),
            datatype: INPUT_DATATYPE.to_string(),
            shape: vec![batch.len(), 3, height as usize, width as usize],
            data,
        }],
    })
}

/// Decode a `[batch, features, boxes]` output tensor.
///
/// For each box the highest class score wins (the first on ties). Boxes
/// scoring below `min_confidence` are dropped. Corners are truncated toward
/// zero. Class ids without an entry in `labels` are named `class_<id>`.
pub fn decode_detections(
    output: &TensorOutput,
    labels: &[String],
    min_confidence: f32,
) -> Result<Vec<Detection>, BackendError> {
    if output.shape.len() < 3 {
        return Err(BackendError::Decode(format!(
            "expected at least 3 dimensions, got {:?}",
            output.shape
        )));
    }
    let dims: Vec<usize> = output.shape[..3]
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<Result<_, _>>()
        .map_err(|_| BackendError::Decode(format!("negative dimension in {:?}", output.shape)))?;
    let (batch_size, features, boxes) = (dims[0], dims[1], dims[2]);

    if features <= BOX_FEATURES {
        return Err(BackendError::Decode(format!(
            "expected more than {} features per box, got {}",
            BOX_FEATURES, features
        )));
    }
    let too_large = || BackendError::Decode(format!("shape {:?} is too large", output.shape));
    let per_image = features.checked_mul(boxes).ok_or_else(too_large)?;
    let required = per_image.checked_mul(batch_size).ok_or_else(too_large)?;
    if output.data.len() < required {
        return Err(BackendError::Decode(format!(
            "shape {:?} needs {} values, got {}",
            output.shape,
            required,
            output.data.len()
        )));
    }

    let mut detections = Vec::new();
    for b in 0..batch_size {
        let image = &output.data[b * per_image..(b + 1) * per_image];
        let at = |feature: usize, i: usize| image[feature * boxes + i];

        for i in 0..boxes {
            let mut best_score = f32::NEG_INFINITY;
            let mut best_class = 0;
            for feature in BOX_FEATURES..features {
                let score = at(feature, i);
                if score > best_score {
                    best_score = score;
                    best_class = feature - BOX_FEATURES;
                }
            }
            if best_score < min_confidence {
                continue;
            }

            let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
            let label = labels
                .get(best_class)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", best_class));

            let mut detection = Detection::new(
                label,
                best_score,
                (cx - w / 2.0) as i32,
                (cy - h / 2.0) as i32,
                (cx + w / 2.0) as i32,
                (cy + h / 2.0) as i32,
            );
            detection.batch_index = Some(b);
            detections.push(detection);
        }
    }
    Ok(detections)
}

/// Map decoded detections back into each batch item's original space.
fn restore_coordinates(
    detections: &mut [Detection],
    batch: &[BatchItem<'_>],
) -> Result<(), BackendError> {
    for detection in detections.iter_mut() {
        let Some(index) = detection.batch_index else {
            continue;
        };
        let item = batch.get(index).ok_or_else(|| {
            BackendError::Decode(format!(
                "output refers to batch image {} but only {} were sent",
                index,
                batch.len()
            ))
        })?;
        detection.offset_and_scale(item.origin_x, item.origin_y, item.height_scale());
    }
    Ok(())
}

/// The tensor-inference wire protocol.
#[derive(Debug, Clone, Default)]
pub struct TensorProtocol {
    labels: Vec<String>,
}

impl TensorProtocol {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl InferenceProtocol for TensorProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Tensor
    }

    fn validate(&self, batch: &[BatchItem<'_>]) -> Result<(), BackendError> {
        check_shapes(batch).map(|_| ())
    }

    fn call<'a>(
        &'a self,
        client: &'a dyn AsyncHttpClient,
        url: &'a str,
        batch: &'a [BatchItem<'a>],
        min_confidence: f32,
    ) -> BoxFuture<'a, Result<InferenceOutput, BackendError>> {
        Box::pin(async move {
            let body = {
                let request = build_request(batch)?;
                serde_json::to_vec(&request).map_err(|e| BackendError::Encode(e.to_string()))?
            };

            let response = client.post_json(url, body).await?;
            let response: TensorResponse = serde_json::from_slice(&response)
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

            let output = response.outputs.first().ok_or_else(|| {
                BackendError::Decode("response contains no output tensors".to_string())
            })?;
            tracing::trace!(
                model = response.model_name.as_deref().unwrap_or("unknown"),
                output = %output.name,
                shape = ?output.shape,
                "Decoding tensor output"
            );

            let mut detections = decode_detections(output, &self.labels, min_confidence)?;
            restore_coordinates(&mut detections, batch)?;

            let module = ModuleInfo {
                module_id: response.model_name.clone(),
                module_name: response.model_version.as_ref().map(|version| {
                    format!(
                        "{} {}",
                        response.model_name.as_deref().unwrap_or("model"),
                        version
                    )
                }),
                inference_device: None,
            };
            Ok(InferenceOutput::new(detections, module))
        })
    }
}
