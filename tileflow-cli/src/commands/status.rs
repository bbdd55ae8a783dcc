//! `status`: report the configured backends.

use std::path::Path;

use clap::Args;
use serde::Serialize;
use tileflow::backend::BackendStatus;
use tileflow::pool::BackendPool;

use super::common;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Check that every backend answers before reporting
    #[arg(long)]
    pub probe: bool,
}

#[derive(Debug, Serialize)]
struct StatusEntry {
    #[serde(flatten)]
    status: BackendStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    reachable: Option<bool>,
}

pub async fn run(config_path: &Path, args: StatusArgs) -> Result<(), CliError> {
    let config = common::load_config(config_path)?;
    let pool = BackendPool::from_descriptors(config.backends.clone(), config.general.pool_config())?;

    let reachable: Vec<Option<bool>> = if args.probe {
        pool.check_all().await.into_iter().map(Some).collect()
    } else {
        vec![None; pool.len()]
    };

    let entries: Vec<StatusEntry> = pool
        .status()
        .into_iter()
        .zip(reachable)
        .map(|(status, reachable)| StatusEntry { status, reachable })
        .collect();
    common::print_json(&entries)
}
