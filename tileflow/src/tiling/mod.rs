//! Tiling geometry.
//!
//! Turns an image and a [`TilingConfig`] into overlapping [`Tile`]s sized
//! for a detection backend. The planner is pure: it holds an immutable
//! configuration and never touches shared state.

mod config;
mod planner;
mod tile;

pub use config::{TileRow, TilingConfig, MAX_OVERLAP_FACTOR};
pub use planner::TilePlanner;
pub use tile::{Tile, TileRegion};
