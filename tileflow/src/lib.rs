//! TileFlow - Tiled object detection across a pool of remote backends
//!
//! This library splits a large image into overlapping, optionally rescaled
//! tiles, dispatches each tile to the best available object-detection
//! backend, maps the detections back into full-image coordinates and merges
//! the duplicates produced by tile overlap.
//!
//! # Architecture
//!
//! ```text
//! image + TilingConfig ──► TilePlanner ──► Vec<Tile>
//!                                              │
//!                                              ▼
//!                         DispatchOrchestrator (one task per tile)
//!                           │  BackendPool::select()
//!                           │  Backend::infer_tile()   (upload | tensor)
//!                           │  remap()
//!                           ▼
//!                     MergePolicy::apply() ──► AggregateResult
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tileflow::config;
//! use tileflow::dispatch::DispatchOrchestrator;
//! use tileflow::pool::BackendPool;
//! use tileflow::tiling::TilePlanner;
//!
//! let app = config::load("tileflow.ini")?;
//! let pool = Arc::new(BackendPool::from_descriptors(
//!     app.backends.clone(),
//!     app.general.pool_config(),
//! )?);
//! let planner = TilePlanner::new(app.plan(1)?.clone());
//! let orchestrator = DispatchOrchestrator::new(pool, app.general.dispatch_options());
//!
//! let image = image::open("frame.jpg")?.to_rgba8();
//! let result = orchestrator.detect(&image, &planner).await;
//! println!("{} detections from {} tiles", result.detections.len(), result.tile_count);
//! ```

pub mod backend;
pub mod config;
pub mod detection;
pub mod dispatch;
pub mod logging;
pub mod pool;
pub mod tiling;
