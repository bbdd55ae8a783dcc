//! Image-upload protocol.
//!
//! One JPEG per request, sent as multipart form data in a field named
//! `image`. The backend answers with a JSON document listing its
//! predictions in the coordinates of the uploaded image:
//!
//! ```text
//! {
//!   "success": true,
//!   "predictions": [
//!     { "confidence": 0.91, "label": "car", "x_min": 12, "y_min": 40, "x_max": 88, "y_max": 97 }
//!   ],
//!   "moduleId": "ObjectDetectionYOLOv8",
//!   "moduleName": "Object Detection (YOLOv8)",
//!   "inferenceDevice": "GPU",
//!   "inferenceMs": 31
//! }
//! ```

use std::io::Cursor;

use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::{RgbImage, RgbaImage};
use serde::Deserialize;

use super::http::{AsyncHttpClient, MultipartFile};
use super::types::{
    BackendError, BatchItem, BoxFuture, InferenceOutput, InferenceProtocol, ModuleInfo,
    ProtocolKind,
};
use crate::detection::Detection;

/// JPEG quality for uploaded tiles.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

const IMAGE_FIELD: &str = "image";
const IMAGE_FILE_NAME: &str = "tile.jpg";
const IMAGE_MIME: &str = "image/jpeg";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    predictions: Vec<WirePrediction>,
    #[serde(default)]
    module_id: Option<String>,
    #[serde(default)]
    module_name: Option<String>,
    #[serde(default)]
    inference_device: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePrediction {
    confidence: f32,
    #[serde(default)]
    label: String,
    #[serde(alias = "xMin")]
    x_min: f64,
    #[serde(alias = "yMin")]
    y_min: f64,
    #[serde(alias = "xMax")]
    x_max: f64,
    #[serde(alias = "yMax")]
    y_max: f64,
}

impl From<WirePrediction> for Detection {
    fn from(p: WirePrediction) -> Self {
        Detection::new(
            p.label,
            p.confidence,
            p.x_min as i32,
            p.y_min as i32,
            p.x_max as i32,
            p.y_max as i32,
        )
    }
}

/// Encode an RGBA image as an RGB JPEG.
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, BackendError> {
    let rgb: RgbImage = image.convert();
    let mut bytes = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(&rgb)
        .map_err(|e| BackendError::Encode(e.to_string()))?;
    Ok(bytes.into_inner())
}

/// Parse an upload-protocol response body.
///
/// A body reporting `"success": false` is treated as an invalid response.
pub fn parse_response(body: &[u8]) -> Result<InferenceOutput, BackendError> {
    let response: UploadResponse =
        serde_json::from_slice(body).map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

    if response.success == Some(false) {
        let reason = response
            .error
            .or(response.message)
            .unwrap_or_else(|| "backend reported failure".to_string());
        return Err(BackendError::InvalidResponse(reason));
    }

    tracing::trace!(
        module = response.module_id.as_deref().unwrap_or("unknown"),
        predictions = response.predictions.len(),
        "Parsed upload response"
    );

    let module = ModuleInfo {
        module_id: response.module_id,
        module_name: response.module_name,
        inference_device: response.inference_device,
    };
    let detections = response
        .predictions
        .into_iter()
        .map(Detection::from)
        .collect();
    Ok(InferenceOutput::new(detections, module))
}

/// The image-upload wire protocol.
#[derive(Debug, Clone)]
pub struct UploadProtocol {
    jpeg_quality: u8,
}

impl UploadProtocol {
    pub fn new() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }
}

impl Default for UploadProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceProtocol for UploadProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Upload
    }

    fn validate(&self, batch: &[BatchItem<'_>]) -> Result<(), BackendError> {
        match batch.len() {
            0 => Err(BackendError::EmptyBatch),
            1 => Ok(()),
            size => Err(BackendError::BatchingUnsupported {
                protocol: ProtocolKind::Upload,
                size,
            }),
        }
    }

    fn call<'a>(
        &'a self,
        client: &'a dyn AsyncHttpClient,
        url: &'a str,
        batch: &'a [BatchItem<'a>],
        _min_confidence: f32,
    ) -> BoxFuture<'a, Result<InferenceOutput, BackendError>> {
        Box::pin(async move {
            self.validate(batch)?;
            let item = &batch[0];
            let jpeg = encode_jpeg(item.image, self.jpeg_quality)?;

            let body = client
                .post_multipart(
                    url,
                    MultipartFile {
                        field: IMAGE_FIELD,
                        file_name: IMAGE_FILE_NAME,
                        mime: IMAGE_MIME,
                        bytes: jpeg,
                    },
                )
                .await?;

            let mut output = parse_response(&body)?;
            let scale = item.height_scale();
            for detection in &mut output.detections {
                detection.offset_and_scale(item.origin_x, item.origin_y, scale);
            }
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::http::tests::MockHttpClient;

    const SAMPLE: &str = r#"{
        "success": true,
        "predictions": [
            {"confidence": 0.91, "label": "car", "x_min": 12, "y_min": 40, "x_max": 88, "y_max": 97},
            {"confidence": 0.30, "label": "person", "x_min": 1.9, "y_min": 2, "x_max": 3, "y_max": 4}
        ],
        "moduleId": "ObjectDetectionYOLOv8",
        "moduleName": "Object Detection (YOLOv8)",
        "inferenceDevice": "GPU",
        "inferenceMs": 31
    }"#;

    #[test]
    fn test_parse_predictions() {
        let detections = parse_response(SAMPLE.as_bytes()).unwrap().detections;
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "car");
        assert_eq!(
            (detections[0].x_min, detections[0].y_min, detections[0].x_max, detections[0].y_max),
            (12, 40, 88, 97)
        );
        assert_eq!(detections[1].x_min, 1);
    }

    #[test]
    fn test_parse_module_metadata() {
        let module = parse_response(SAMPLE.as_bytes()).unwrap().module.unwrap();
        assert_eq!(module.module_id.as_deref(), Some("ObjectDetectionYOLOv8"));
        assert_eq!(module.module_name.as_deref(), Some("Object Detection (YOLOv8)"));
        assert_eq!(module.inference_device.as_deref(), Some("GPU"));
    }

    #[test]
    fn test_parse_camel_case_coordinates() {
        let body = r#"{"predictions":[{"confidence":0.5,"label":"dog","xMin":1,"yMin":2,"xMax":3,"yMax":4}]}"#;
        let detections = parse_response(body.as_bytes()).unwrap().detections;
        assert_eq!(detections[0].y_max, 4);
    }

    #[test]
    fn test_parse_missing_predictions_is_empty() {
        let output = parse_response(br#"{"success": true}"#).unwrap();
        assert!(output.detections.is_empty());
        assert_eq!(output.module, None);
    }

    #[test]
    fn test_parse_reported_failure() {
        let err = parse_response(br#"{"success": false, "error": "model not loaded"}"#)
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::InvalidResponse("model not loaded".to_string())
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_response(b"<html>"),
            Err(BackendError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg() {
        let image = RgbaImage::from_pixel(16, 8, image::Rgba([200, 10, 10, 255]));
        let bytes = encode_jpeg(&image, 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_jpeg_quality_clamped() {
        assert_eq!(UploadProtocol::new().jpeg_quality(), DEFAULT_JPEG_QUALITY);
        assert_eq!(UploadProtocol::new().with_jpeg_quality(60).jpeg_quality(), 60);
        assert_eq!(UploadProtocol::new().with_jpeg_quality(0).jpeg_quality(), 1);
        assert_eq!(UploadProtocol::new().with_jpeg_quality(250).jpeg_quality(), 100);
    }

    #[test]
    fn test_validate_batch_size() {
        let protocol = UploadProtocol::new();
        let image = RgbaImage::new(4, 4);
        assert_eq!(protocol.validate(&[]), Err(BackendError::EmptyBatch));
        assert!(protocol.validate(&[BatchItem::new(&image)]).is_ok());
        assert_eq!(
            protocol.validate(&[BatchItem::new(&image), BatchItem::new(&image)]),
            Err(BackendError::BatchingUnsupported {
                protocol: ProtocolKind::Upload,
                size: 2
            })
        );
    }

    #[tokio::test]
    async fn test_call_posts_multipart_jpeg() {
        let client = MockHttpClient::responding(SAMPLE.as_bytes().to_vec());
        let protocol = UploadProtocol::new();
        let image = RgbaImage::new(32, 32);
        let batch = [BatchItem::new(&image)];

        let output = protocol
            .call(&client, "http://h:1/v1/vision/detection", &batch, 0.4)
            .await
            .unwrap();

        assert_eq!(output.detections.len(), 2);
        assert!(output.module.is_some());
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].field.as_deref(), Some("image"));
        assert_eq!(requests[0].file_name.as_deref(), Some("tile.jpg"));
        assert_eq!(&requests[0].body[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_call_maps_to_original_space() {
        let client = MockHttpClient::responding(SAMPLE.as_bytes().to_vec());
        let image = RgbaImage::new(32, 32);
        let batch = [BatchItem::with_origin(&image, 10, 0, 64, 64)];

        let detections = UploadProtocol::new()
            .call(&client, "http://h:1/", &batch, 0.4)
            .await
            .unwrap()
            .detections;

        assert_eq!(detections[0].x_min, 44);
        assert_eq!(detections[0].y_min, 80);
    }
}
