//! A configured backend: descriptor, protocol, HTTP client and stats.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::http::{AsyncHttpClient, ReqwestClient};
use super::stats::BackendStats;
use super::tensor::TensorProtocol;
use super::types::{
    BackendDescriptor, BackendError, BatchItem, InferenceOutput, InferenceProtocol, ProtocolKind,
};
use super::upload::UploadProtocol;
use crate::tiling::Tile;

/// Point-in-time view of a backend, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub protocol: ProtocolKind,
    pub url: String,
    pub is_active: bool,
    pub rolling_latency_ms: f64,
    pub active_calls: usize,
    pub total_calls: u64,
    pub failed_calls: u64,
    /// Seconds since the last successful call or probe.
    pub seconds_since_active: Option<f64>,
}

/// One inference endpoint of the pool.
///
/// Every call goes through [`Backend::infer`], which keeps the active call
/// counter, the latency average and the health flag up to date regardless
/// of the wire protocol.
pub struct Backend {
    descriptor: BackendDescriptor,
    base_url: String,
    service_url: String,
    protocol: Box<dyn InferenceProtocol>,
    client: Arc<dyn AsyncHttpClient>,
    stats: BackendStats,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.descriptor.name)
            .field("url", &self.service_url)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Build a backend with a reqwest client honouring the descriptor timeout.
    pub fn new(descriptor: BackendDescriptor) -> Result<Self, BackendError> {
        let client = ReqwestClient::with_timeout(descriptor.timeout)?;
        Ok(Self::with_client(descriptor, Arc::new(client)))
    }

    /// Build a backend around an existing HTTP client.
    pub fn with_client(descriptor: BackendDescriptor, client: Arc<dyn AsyncHttpClient>) -> Self {
        let protocol: Box<dyn InferenceProtocol> = match descriptor.protocol {
            ProtocolKind::Upload => {
                let mut upload = UploadProtocol::new();
                if let Some(quality) = descriptor.jpeg_quality {
                    upload = upload.with_jpeg_quality(quality);
                }
                Box::new(upload)
            }
            ProtocolKind::Tensor => Box::new(TensorProtocol::new(descriptor.labels.clone())),
        };
        Self {
            base_url: descriptor.base_url(),
            service_url: descriptor.service_url(),
            stats: BackendStats::new(descriptor.ema_alpha),
            descriptor,
            protocol,
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol.kind()
    }

    pub fn is_active(&self) -> bool {
        self.stats.is_active()
    }

    fn check_batch(&self, batch: &[BatchItem<'_>]) -> Result<(), BackendError> {
        if batch.is_empty() {
            return Err(BackendError::EmptyBatch);
        }
        if let Some(max) = self.descriptor.max_batch_size {
            if batch.len() > max {
                return Err(BackendError::BatchTooLarge {
                    size: batch.len(),
                    max,
                });
            }
        }
        self.protocol.validate(batch)
    }

    /// Run inference on a batch.
    ///
    /// Detections come back in each item's original space. On success the
    /// call latency divided by the batch size feeds the moving average. A
    /// call failure deactivates the backend; a rejected batch does not and
    /// never reaches the network.
    pub async fn infer(
        &self,
        batch: &[BatchItem<'_>],
        min_confidence: f32,
    ) -> Result<InferenceOutput, BackendError> {
        self.check_batch(batch)?;

        let _call = self.stats.begin_call();
        let started = Instant::now();
        let result = self
            .protocol
            .call(
                self.client.as_ref(),
                &self.service_url,
                batch,
                min_confidence,
            )
            .await;

        match result {
            Ok(output) => {
                let per_image = started.elapsed() / batch.len() as u32;
                self.stats.record_success(per_image);
                debug!(
                    backend = %self.descriptor.name,
                    images = batch.len(),
                    detections = output.detections.len(),
                    per_image_ms = per_image.as_millis() as u64,
                    "Inference call completed"
                );
                Ok(output)
            }
            Err(e) => {
                if e.is_call_failure() {
                    self.stats.record_failure();
                    warn!(
                        backend = %self.descriptor.name,
                        error = %e,
                        "Inference call failed, backend deactivated"
                    );
                }
                Err(e)
            }
        }
    }

    /// Run inference on a single tile, in tile pixel coordinates.
    pub async fn infer_tile(
        &self,
        tile: &Tile,
        min_confidence: f32,
    ) -> Result<InferenceOutput, BackendError> {
        let batch = [BatchItem::new(tile.image())];
        self.infer(&batch, min_confidence).await
    }

    /// GET the backend root; reactivate it on success.
    pub async fn probe(&self) -> bool {
        match self.client.get(&self.base_url).await {
            Ok(()) => {
                let was_active = self.stats.is_active();
                self.stats.activate();
                if !was_active {
                    info!(backend = %self.descriptor.name, "Backend reachable again, reactivated");
                }
                true
            }
            Err(e) => {
                debug!(backend = %self.descriptor.name, error = %e, "Backend probe failed");
                false
            }
        }
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            name: self.descriptor.name.clone(),
            protocol: self.protocol.kind(),
            url: self.service_url.clone(),
            is_active: self.stats.is_active(),
            rolling_latency_ms: self.stats.rolling_latency_ms(),
            active_calls: self.stats.active_calls(),
            total_calls: self.stats.total_calls(),
            failed_calls: self.stats.failed_calls(),
            seconds_since_active: self
                .stats
                .last_active()
                .map(|at| at.elapsed().as_secs_f64()),
        }
    }
}
