//! Backend descriptor, protocol trait and error types.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use image::RgbaImage;
use serde::Serialize;
use thiserror::Error;

use super::http::AsyncHttpClient;
use crate::config::ConfigError;
use crate::detection::Detection;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default smoothing factor for the latency moving average.
pub const DEFAULT_EMA_ALPHA: f64 = 0.1;

/// Default detection path for upload backends (CodeProject.AI layout).
pub const DEFAULT_UPLOAD_ENDPOINT: &str = "/v1/vision/detection";

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised by a backend call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Network-level failure (connection refused, reset, DNS, ...).
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// The per-backend timeout elapsed.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The backend answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The response body could not be parsed or reported a failure.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The tensor output was missing or had an unexpected shape.
    #[error("failed to decode tensor output: {0}")]
    Decode(String),

    /// The request could not be encoded locally.
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// Tensor batches need identically sized images.
    #[error(
        "batch image {index} is {width}x{height}, expected {expected_width}x{expected_height}"
    )]
    ShapeMismatch {
        index: usize,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error("cannot send an empty batch")]
    EmptyBatch,

    #[error("batch of {size} images exceeds maximum batch size {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("{protocol} protocol accepts one image per call, got {size}")]
    BatchingUnsupported { protocol: ProtocolKind, size: usize },

    #[error("failed to create HTTP client: {0}")]
    ClientBuild(String),
}

impl BackendError {
    /// Whether this error means the remote backend misbehaved.
    ///
    /// Call failures deactivate the backend. Request-shape rejections and
    /// local encoding problems do not.
    pub fn is_call_failure(&self) -> bool {
        matches!(
            self,
            BackendError::Http { .. }
                | BackendError::Timeout { .. }
                | BackendError::Status { .. }
                | BackendError::InvalidResponse(_)
                | BackendError::Decode(_)
        )
    }
}

/// What a backend reports about the model that served a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub module_id: Option<String>,
    pub module_name: Option<String>,
    pub inference_device: Option<String>,
}

impl ModuleInfo {
    pub fn is_empty(&self) -> bool {
        self.module_id.is_none() && self.module_name.is_none() && self.inference_device.is_none()
    }
}

/// Detections from one call, in each item's original space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceOutput {
    pub detections: Vec<Detection>,
    /// `None` when the backend said nothing about its model.
    pub module: Option<ModuleInfo>,
}

impl InferenceOutput {
    pub fn new(detections: Vec<Detection>, module: ModuleInfo) -> Self {
        Self {
            detections,
            module: (!module.is_empty()).then_some(module),
        }
    }
}

/// Wire protocol spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// Single JPEG upload as multipart form data, JSON prediction list back.
    Upload,
    /// Dense FP32 tensor batch as JSON, raw output tensor back.
    Tensor,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Upload => "upload",
            ProtocolKind::Tensor => "tensor",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upload" | "codeproject" | "codeprojectai" => Ok(ProtocolKind::Upload),
            "tensor" => Ok(ProtocolKind::Tensor),
            other => Err(format!("unknown backend type '{}'", other)),
        }
    }
}

/// Static description of one inference endpoint.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tileflow::backend::{BackendDescriptor, ProtocolKind};
///
/// let backend = BackendDescriptor::new("gpu-a", "10.0.0.5", 32168, ProtocolKind::Upload)
///     .with_timeout(Duration::from_secs(5))
///     .with_tls(true);
///
/// assert_eq!(backend.base_url(), "https://10.0.0.5:32168");
/// assert_eq!(backend.service_url(), "https://10.0.0.5:32168/v1/vision/detection");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub endpoint: String,
    pub tls: bool,
    pub timeout: Duration,
    pub ema_alpha: f64,
    pub max_batch_size: Option<usize>,
    /// Class names indexed by class id (tensor protocol only).
    pub labels: Vec<String>,
    /// JPEG quality for uploaded images (upload protocol only).
    pub jpeg_quality: Option<u8>,
    pub protocol: ProtocolKind,
}

impl BackendDescriptor {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        protocol: ProtocolKind,
    ) -> Self {
        let endpoint = match protocol {
            ProtocolKind::Upload => DEFAULT_UPLOAD_ENDPOINT.to_string(),
            ProtocolKind::Tensor => "/".to_string(),
        };
        Self {
            name: name.into(),
            host: host.into(),
            port,
            endpoint,
            tls: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ema_alpha: DEFAULT_EMA_ALPHA,
            max_batch_size: None,
            labels: Vec::new(),
            jpeg_quality: None,
            protocol,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ema_alpha(mut self, alpha: f64) -> Self {
        self.ema_alpha = alpha;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = Some(max);
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = Some(quality);
        self
    }

    fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    /// Root URL used for liveness probes.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }

    /// URL inference requests are posted to.
    pub fn service_url(&self) -> String {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() || endpoint.starts_with('/') {
            format!("{}{}", self.base_url(), endpoint)
        } else {
            format!("{}/{}", self.base_url(), endpoint)
        }
    }

    /// Check the descriptor for values no backend can work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBackend`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBackend {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(invalid("moving average alpha must be > 0 and <= 1"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout must be positive"));
        }
        if self.max_batch_size == Some(0) {
            return Err(invalid("max batch size must be at least 1"));
        }
        if matches!(self.jpeg_quality, Some(q) if !(1..=100).contains(&q)) {
            return Err(invalid("JPEG quality must be between 1 and 100"));
        }
        Ok(())
    }
}

/// One image of a backend request, with the information needed to map
/// its detections back into the space it was cut from.
///
/// For a plain tile the origin is `(0, 0)` and the original size equals the
/// image size, so the mapping is the identity.
#[derive(Debug, Clone, Copy)]
pub struct BatchItem<'a> {
    pub image: &'a RgbaImage,
    pub origin_x: i32,
    pub origin_y: i32,
    pub original_width: u32,
    pub original_height: u32,
}

impl<'a> BatchItem<'a> {
    pub fn new(image: &'a RgbaImage) -> Self {
        Self {
            image,
            origin_x: 0,
            origin_y: 0,
            original_width: image.width(),
            original_height: image.height(),
        }
    }

    pub fn with_origin(
        image: &'a RgbaImage,
        origin_x: i32,
        origin_y: i32,
        original_width: u32,
        original_height: u32,
    ) -> Self {
        Self {
            image,
            origin_x,
            origin_y,
            original_width,
            original_height,
        }
    }

    /// Factor from this image's pixels back to its original pixels.
    pub fn height_scale(&self) -> f32 {
        if self.image.height() == 0 {
            return 1.0;
        }
        self.original_height as f32 / self.image.height() as f32
    }
}

/// A backend wire protocol.
///
/// Implementations only translate between images and detections; call
/// accounting (active calls, latency, health) is handled once by
/// [`Backend`](super::Backend).
pub trait InferenceProtocol: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    /// Reject batches this protocol cannot send, before any call is made.
    fn validate(&self, batch: &[BatchItem<'_>]) -> Result<(), BackendError>;

    /// Send the batch and decode the detections.
    ///
    /// Returned coordinates are relative to each item's original space.
    fn call<'a>(
        &'a self,
        client: &'a dyn AsyncHttpClient,
        url: &'a str,
        batch: &'a [BatchItem<'a>],
        min_confidence: f32,
    ) -> BoxFuture<'a, Result<InferenceOutput, BackendError>>;
}
