//! `tiles`: show how an image would be split, without contacting backends.

use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;
use tileflow::tiling::{TilePlanner, TileRegion};

use super::common::{self, ImageInfo};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct TilesArgs {
    /// Image file to plan tiles for
    pub image: PathBuf,

    /// Tile plan id (defaults to the lowest configured id)
    #[arg(long)]
    pub plan: Option<u32>,
}

#[derive(Debug, Serialize)]
struct TilesReport {
    image: ImageInfo,
    plan: String,
    tile_count: usize,
    tiles: Vec<TileRegion>,
}

pub fn run(config_path: &Path, args: TilesArgs) -> Result<(), CliError> {
    let config = common::load_config(config_path)?;
    let planner = TilePlanner::new(common::resolve_plan(&config, args.plan)?);
    let (width, height) = common::image_dimensions(&args.image)?;

    let tiles = planner.regions(width, height);
    common::print_json(&TilesReport {
        image: ImageInfo::new(&args.image, width, height),
        plan: planner.config().name().to_string(),
        tile_count: tiles.len(),
        tiles,
    })
}
