//! Remote detection backends.
//!
//! A backend is an HTTP service that runs object detection on images. Two
//! wire protocols are supported, both behind [`InferenceProtocol`]:
//!
//! | Protocol | Request | Response | Batching |
//! |----------|---------|----------|----------|
//! | [`ProtocolKind::Upload`] | multipart JPEG | JSON predictions | one image |
//! | [`ProtocolKind::Tensor`] | JSON FP32 tensor | JSON output tensor | equal-size images |
//!
//! [`Backend`] wraps a protocol with an HTTP client and [`BackendStats`],
//! so load and health are tracked the same way for both.

mod endpoint;
pub mod http;
mod stats;
pub mod tensor;
mod types;
pub mod upload;

pub use endpoint::{Backend, BackendStatus};
pub use http::{AsyncHttpClient, MultipartFile, ReqwestClient};
pub use stats::{ActiveCallGuard, BackendStats, ProbeGuard};
pub use tensor::TensorProtocol;
pub use types::{
    BackendDescriptor, BackendError, BatchItem, BoxFuture, InferenceOutput, InferenceProtocol,
    ModuleInfo, ProtocolKind, DEFAULT_EMA_ALPHA, DEFAULT_TIMEOUT_SECS, DEFAULT_UPLOAD_ENDPOINT,
};
pub use upload::UploadProtocol;
