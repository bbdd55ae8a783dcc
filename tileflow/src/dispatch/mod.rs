//! Tile dispatch: fan tiles out to the pool, gather and merge detections.

mod orchestrator;
mod types;

pub use orchestrator::DispatchOrchestrator;
pub use types::{
    busy_time, AggregateResult, CallInterval, DispatchError, DispatchOptions, ModuleSummary,
    TileOutcome, TileStatus, DEFAULT_MIN_CONFIDENCE,
};
