//! Concurrent per-tile dispatch and merge.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use image::RgbaImage;
use tracing::{debug, info, warn};

use super::types::{
    busy_time, AggregateResult, CallInterval, DispatchError, DispatchOptions, ModuleSummary,
    TileOutcome, TileStatus,
};
use crate::backend::BatchItem;
use crate::detection::remap;
use crate::pool::BackendPool;
use crate::tiling::{Tile, TilePlanner};

/// Runs one image through the pool.
///
/// Each tile becomes its own task: select a backend, call it, filter by
/// confidence, tag the backend name and remap into full-image coordinates.
/// Selection happens inside the task, so every tile sees the load left by
/// the calls already in flight. A tile whose backend fails is not retried.
#[derive(Debug, Clone)]
pub struct DispatchOrchestrator {
    pool: Arc<BackendPool>,
    options: DispatchOptions,
}

impl DispatchOrchestrator {
    pub fn new(pool: Arc<BackendPool>, options: DispatchOptions) -> Self {
        Self { pool, options }
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Split `image` with `planner` and dispatch the tiles.
    pub async fn detect(&self, image: &RgbaImage, planner: &TilePlanner) -> AggregateResult {
        let tiles = planner.split(image);
        self.dispatch(tiles, image.width(), image.height()).await
    }

    /// Dispatch tiles cut from an `image_width` x `image_height` image.
    ///
    /// Never fails: tiles that cannot be served are counted and contribute
    /// no detections.
    pub async fn dispatch(
        &self,
        tiles: Vec<Tile>,
        image_width: u32,
        image_height: u32,
    ) -> AggregateResult {
        let started = Instant::now();
        let tile_count = tiles.len();
        debug!(
            tiles = tile_count,
            backends = self.pool.len(),
            "Dispatching tiles"
        );

        let handles: Vec<_> = tiles
            .into_iter()
            .enumerate()
            .map(|(index, tile)| {
                tokio::spawn(process_tile(
                    index,
                    tile,
                    Arc::clone(&self.pool),
                    self.options.min_confidence,
                    image_width,
                    image_height,
                ))
            })
            .collect();
        let joined = join_all(handles).await;

        let merge_started = Instant::now();
        let mut detections = Vec::new();
        let mut calls: Vec<CallInterval> = Vec::new();
        let mut backends: Vec<String> = Vec::new();
        let mut modules = ModuleSummary::default();
        let (mut served, mut failed, mut unserved) = (0, 0, 0);

        for outcome in joined {
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Tile task did not complete");
                    failed += 1;
                    continue;
                }
            };
            match outcome.status {
                TileStatus::Served => served += 1,
                TileStatus::Failed => failed += 1,
                TileStatus::Unserved => unserved += 1,
            }
            if outcome.status == TileStatus::Served {
                if let Some(name) = outcome.backend {
                    if !backends.contains(&name) {
                        backends.push(name);
                    }
                }
            }
            if let Some(module) = &outcome.module {
                modules.record(module);
            }
            calls.extend(outcome.call);
            detections.extend(outcome.detections);
        }

        let candidates = detections.len();
        let detections = self
            .options
            .merge_policy
            .apply(detections, self.options.iou_threshold);

        let result = AggregateResult {
            detections,
            tile_count,
            served_tiles: served,
            failed_tiles: failed,
            unserved_tiles: unserved,
            inference_ms: busy_time(&calls).as_millis() as u64,
            processing_ms: merge_started.elapsed().as_millis() as u64,
            round_trip_ms: started.elapsed().as_millis() as u64,
            backends,
            merge_policy: Some(self.options.merge_policy),
            modules,
        };

        info!(
            tiles = tile_count,
            served,
            failed,
            unserved,
            candidates,
            detections = result.detections.len(),
            inference_ms = result.inference_ms,
            round_trip_ms = result.round_trip_ms,
            "{}",
            result.summary()
        );
        result
    }

    /// Send the whole image to one backend, without tiling or merging.
    ///
    /// Detections are filtered by confidence and tagged with the backend
    /// name; the result has a single tile and no merge policy.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NoBackendAvailable`] when no backend is active, and
    /// [`DispatchError::Backend`] when the chosen backend fails.
    pub async fn detect_whole(&self, image: &RgbaImage) -> Result<AggregateResult, DispatchError> {
        let started = Instant::now();
        let backend = self
            .pool
            .select()
            .ok_or(DispatchError::NoBackendAvailable)?;

        let call_started = Instant::now();
        let output = backend
            .infer(&[BatchItem::new(image)], self.options.min_confidence)
            .await
            .map_err(|source| DispatchError::Backend {
                backend: backend.name().to_string(),
                source,
            })?;
        let inference_ms = call_started.elapsed().as_millis() as u64;

        let processing_started = Instant::now();
        let min_confidence = self.options.min_confidence;
        let detections = output
            .detections
            .into_iter()
            .filter(|d| d.confidence >= min_confidence)
            .map(|mut d| {
                d.backend = backend.name().to_string();
                d
            })
            .collect();
        let mut modules = ModuleSummary::default();
        if let Some(module) = &output.module {
            modules.record(module);
        }

        let result = AggregateResult {
            detections,
            tile_count: 1,
            served_tiles: 1,
            failed_tiles: 0,
            unserved_tiles: 0,
            inference_ms,
            processing_ms: processing_started.elapsed().as_millis() as u64,
            round_trip_ms: started.elapsed().as_millis() as u64,
            backends: vec![backend.name().to_string()],
            merge_policy: None,
            modules,
        };
        info!(
            backend = %backend.name(),
            detections = result.detections.len(),
            inference_ms,
            "{}",
            result.summary()
        );
        Ok(result)
    }
}

async fn process_tile(
    index: usize,
    tile: Tile,
    pool: Arc<BackendPool>,
    min_confidence: f32,
    image_width: u32,
    image_height: u32,
) -> TileOutcome {
    let Some(backend) = pool.select() else {
        debug!(tile = index, "No active backend, tile skipped");
        return TileOutcome::unserved();
    };

    let start = Instant::now();
    let result = backend.infer_tile(&tile, min_confidence).await;
    let call = CallInterval {
        start,
        end: Instant::now(),
    };

    match result {
        Ok(output) => {
            let detections = output
                .detections
                .into_iter()
                .filter(|d| d.confidence >= min_confidence)
                .map(|mut d| {
                    d.backend = backend.name().to_string();
                    remap(&d, tile.region(), image_width, image_height)
                })
                .collect();
            TileOutcome {
                status: TileStatus::Served,
                backend: Some(backend.name().to_string()),
                detections,
                module: output.module,
                call: Some(call),
            }
        }
        Err(e) => {
            warn!(tile = index, backend = %backend.name(), error = %e, "Tile failed");
            TileOutcome {
                status: TileStatus::Failed,
                backend: Some(backend.name().to_string()),
                detections: Vec::new(),
                module: None,
                call: Some(call),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::http::tests::MockHttpClient;
    use crate::backend::{Backend, BackendDescriptor, BackendError, ProtocolKind};
    use crate::detection::MergePolicy;
    use crate::pool::PoolConfig;
    use crate::tiling::{TileRow, TilingConfig};

    fn pool_of(clients: Vec<(&str, Arc<MockHttpClient>)>) -> Arc<BackendPool> {
        let backends = clients
            .into_iter()
            .map(|(name, client)| {
                Backend::with_client(
                    BackendDescriptor::new(name, "localhost", 1, ProtocolKind::Upload),
                    client,
                )
            })
            .collect();
        Arc::new(BackendPool::new(
            backends,
            PoolConfig::default().with_sweep_on_select(false),
        ))
    }

    fn planner() -> TilePlanner {
        // 200x100 image -> two 100x100 tiles at scale 1.
        let row = TileRow::new(0, 100, 100, 0.0, 100);
        TilePlanner::new(TilingConfig::new(1, "test", vec![row]).unwrap())
    }

    const ONE_CAR: &str = r#"{"predictions":[
        {"confidence":0.9,"label":"car","x_min":10,"y_min":10,"x_max":20,"y_max":20},
        {"confidence":0.1,"label":"noise","x_min":0,"y_min":0,"x_max":5,"y_max":5}]}"#;

    #[tokio::test]
    async fn test_detect_remaps_and_filters() {
        let pool = pool_of(vec![(
            "a",
            Arc::new(MockHttpClient::responding(ONE_CAR.as_bytes().to_vec())),
        )]);
        let orchestrator = DispatchOrchestrator::new(
            pool,
            DispatchOptions::default().with_merge_policy(MergePolicy::PerLabel),
        );
        let image = RgbaImage::new(200, 100);

        let result = orchestrator.detect(&image, &planner()).await;

        assert_eq!(result.tile_count, 2);
        assert_eq!(result.served_tiles, 2);
        assert_eq!(result.backends, vec!["a".to_string()]);
        assert_eq!(result.detections.len(), 2);
        let mut xs: Vec<i32> = result.detections.iter().map(|d| d.x_min).collect();
        xs.sort();
        assert_eq!(xs, vec![10, 110]);
        assert!(result.detections.iter().all(|d| d.backend == "a"));
        assert!(result.detections.iter().all(|d| d.label == "car"));
    }

    #[tokio::test]
    async fn test_no_active_backend_yields_empty_result() {
        let pool = pool_of(vec![(
            "a",
            Arc::new(MockHttpClient::responding(ONE_CAR.as_bytes().to_vec())),
        )]);
        pool.get("a").unwrap().stats().record_failure();
        let orchestrator = DispatchOrchestrator::new(pool, DispatchOptions::default());

        let result = orchestrator.detect(&RgbaImage::new(200, 100), &planner()).await;

        assert!(result.detections.is_empty());
        assert_eq!(result.unserved_tiles, 2);
        assert!(result.backends.is_empty());
        assert_eq!(result.inference_ms, 0);
    }

    #[tokio::test]
    async fn test_failed_tile_not_retried() {
        let failing = Arc::new(MockHttpClient::failing(BackendError::Status {
            status: 503,
            url: "u".to_string(),
        }));
        let pool = pool_of(vec![("a", failing.clone())]);
        let orchestrator = DispatchOrchestrator::new(pool, DispatchOptions::default());

        let result = orchestrator.detect(&RgbaImage::new(200, 100), &planner()).await;

        assert!(result.detections.is_empty());
        assert_eq!(result.failed_tiles + result.unserved_tiles, 2);
        assert!(result.failed_tiles >= 1);
        assert_eq!(failing.requests().len(), result.failed_tiles);
    }

    const MODULE_REPLY: &str = r#"{"predictions":[
        {"confidence":0.9,"label":"car","x_min":10,"y_min":10,"x_max":20,"y_max":20},
        {"confidence":0.8,"label":"car","x_min":11,"y_min":10,"x_max":21,"y_max":20},
        {"confidence":0.1,"label":"noise","x_min":0,"y_min":0,"x_max":5,"y_max":5}],
        "moduleId":"ObjectDetectionYOLOv8","inferenceDevice":"GPU"}"#;

    #[tokio::test]
    async fn test_module_metadata_collected() {
        let pool = pool_of(vec![(
            "a",
            Arc::new(MockHttpClient::responding(MODULE_REPLY.as_bytes().to_vec())),
        )]);
        let orchestrator = DispatchOrchestrator::new(pool, DispatchOptions::default());

        let result = orchestrator.detect(&RgbaImage::new(200, 100), &planner()).await;

        assert_eq!(result.modules.module_ids, vec!["ObjectDetectionYOLOv8"]);
        assert_eq!(result.modules.inference_devices, vec!["GPU"]);
        assert!(result.modules.module_names.is_empty());
        assert_eq!(result.merge_policy, Some(MergePolicy::PerLabel));
    }

    #[tokio::test]
    async fn test_detect_whole_sends_one_untiled_image() {
        let client = Arc::new(MockHttpClient::responding(MODULE_REPLY.as_bytes().to_vec()));
        let pool = pool_of(vec![("a", client.clone())]);
        let orchestrator = DispatchOrchestrator::new(pool, DispatchOptions::default());

        let result = orchestrator
            .detect_whole(&RgbaImage::new(300, 120))
            .await
            .unwrap();

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        let sent = image::load_from_memory(&requests[0].body).unwrap();
        assert_eq!((sent.width(), sent.height()), (300, 120));

        // Overlapping boxes survive: nothing is merged.
        assert_eq!(result.detections.len(), 2);
        assert!(result.detections.iter().all(|d| d.backend == "a"));
        assert_eq!((result.tile_count, result.served_tiles), (1, 1));
        assert_eq!(result.backends, vec!["a".to_string()]);
        assert_eq!(result.merge_policy, None);
        assert_eq!(result.modules.module_ids, vec!["ObjectDetectionYOLOv8"]);
    }

    #[tokio::test]
    async fn test_detect_whole_without_backend() {
        let pool = pool_of(vec![(
            "a",
            Arc::new(MockHttpClient::responding(MODULE_REPLY.as_bytes().to_vec())),
        )]);
        pool.get("a").unwrap().stats().record_failure();
        let orchestrator = DispatchOrchestrator::new(pool, DispatchOptions::default());

        let err = orchestrator
            .detect_whole(&RgbaImage::new(10, 10))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::NoBackendAvailable);
    }

    #[tokio::test]
    async fn test_detect_whole_backend_failure() {
        let client = Arc::new(MockHttpClient::failing(BackendError::Status {
            status: 500,
            url: "u".to_string(),
        }));
        let pool = pool_of(vec![("a", client)]);
        let orchestrator = DispatchOrchestrator::new(Arc::clone(&pool), DispatchOptions::default());

        let err = orchestrator
            .detect_whole(&RgbaImage::new(10, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Backend { ref backend, .. } if backend == "a"));
        assert!(!pool.get("a").unwrap().is_active());
    }

    #[tokio::test]
    async fn test_empty_tile_list() {
        let pool = pool_of(Vec::new());
        let orchestrator = DispatchOrchestrator::new(pool, DispatchOptions::default());
        let result = orchestrator.dispatch(Vec::new(), 10, 10).await;
        assert_eq!(result.tile_count, 0);
        assert!(result.detections.is_empty());
        assert!(result.is_complete());
    }
}
