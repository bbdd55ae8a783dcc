//! Common types and utilities shared across CLI commands.

use std::path::Path;

use clap::ValueEnum;
use image::RgbaImage;
use serde::Serialize;
use tileflow::config::{self, AppConfig};
use tileflow::detection::MergePolicy;
use tileflow::tiling::TilingConfig;

use crate::error::CliError;

/// Merge policy selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum MergeArg {
    /// Suppress overlaps regardless of label
    Global,
    /// Suppress overlaps within each label
    PerLabel,
    /// Union overlapping boxes within each label
    PerLabelUnion,
}

impl From<MergeArg> for MergePolicy {
    fn from(arg: MergeArg) -> Self {
        match arg {
            MergeArg::Global => MergePolicy::Global,
            MergeArg::PerLabel => MergePolicy::PerLabel,
            MergeArg::PerLabelUnion => MergePolicy::PerLabelUnion,
        }
    }
}

/// Image size as reported in command output.
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

impl ImageInfo {
    pub fn new(path: &Path, width: u32, height: u32) -> Self {
        Self {
            path: path.display().to_string(),
            width,
            height,
        }
    }
}

pub fn load_config(path: &Path) -> Result<AppConfig, CliError> {
    Ok(config::load(path)?)
}

/// Pick the requested plan, or the lowest id when none is given.
pub fn resolve_plan(config: &AppConfig, plan: Option<u32>) -> Result<TilingConfig, CliError> {
    let plan = match plan {
        Some(id) => config.plan(id)?,
        None => config.default_plan()?,
    };
    Ok(plan.clone())
}

pub fn open_image(path: &Path) -> Result<RgbaImage, CliError> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|source| CliError::Image {
            path: path.to_path_buf(),
            source,
        })
}

pub fn image_dimensions(path: &Path) -> Result<(u32, u32), CliError> {
    image::image_dimensions(path).map_err(|source| CliError::Image {
        path: path.to_path_buf(),
        source,
    })
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
