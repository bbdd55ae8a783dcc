//! `detect`: run an image through the backend pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use serde::Serialize;
use tileflow::dispatch::{AggregateResult, DispatchOrchestrator};
use tileflow::pool::BackendPool;
use tileflow::tiling::TilePlanner;
use tracing::debug;

use super::common::{self, ImageInfo, MergeArg};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// Image file to analyse
    pub image: PathBuf,

    /// Tile plan id (defaults to the lowest configured id)
    #[arg(long)]
    pub plan: Option<u32>,

    /// Override the configured merge policy
    #[arg(long, value_enum)]
    pub merge: Option<MergeArg>,

    /// Override the configured minimum confidence (0 to 1)
    #[arg(long)]
    pub min_confidence: Option<f32>,

    /// Send the whole image to a single backend, without tiling or merging
    #[arg(long, conflicts_with_all = ["plan", "merge"])]
    pub no_tiling: bool,
}

#[derive(Debug, Serialize)]
struct DetectReport {
    message: String,
    image: ImageInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<String>,
    #[serde(flatten)]
    result: AggregateResult,
}

pub async fn run(config_path: &Path, args: DetectArgs) -> Result<(), CliError> {
    let config = common::load_config(config_path)?;

    let mut options = config.general.dispatch_options();
    if let Some(merge) = args.merge {
        options = options.with_merge_policy(merge.into());
    }
    if let Some(min_confidence) = args.min_confidence {
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(CliError::InvalidArgument(format!(
                "--min-confidence {} must be between 0 and 1",
                min_confidence
            )));
        }
        options = options.with_min_confidence(min_confidence);
    }

    let planner = if args.no_tiling {
        None
    } else {
        Some(TilePlanner::new(common::resolve_plan(&config, args.plan)?))
    };

    let image = common::open_image(&args.image)?;
    debug!(
        path = %args.image.display(),
        width = image.width(),
        height = image.height(),
        plan = planner.as_ref().map(|p| p.config().name()),
        "Image loaded"
    );

    let pool = Arc::new(BackendPool::from_descriptors(
        config.backends.clone(),
        config.general.pool_config(),
    )?);
    let orchestrator = DispatchOrchestrator::new(pool, options);
    let result = match &planner {
        Some(planner) => orchestrator.detect(&image, planner).await,
        None => orchestrator.detect_whole(&image).await?,
    };

    common::print_json(&DetectReport {
        message: result.summary(),
        image: ImageInfo::new(&args.image, image.width(), image.height()),
        plan: planner.map(|p| p.config().name().to_string()),
        result,
    })
}
