//! Loaded application settings.

use std::time::Duration;

use crate::backend::BackendDescriptor;
use crate::detection::{MergePolicy, DEFAULT_IOU_THRESHOLD};
use crate::dispatch::{DispatchOptions, DEFAULT_MIN_CONFIDENCE};
use crate::pool::{PoolConfig, DEFAULT_INACTIVE_CHECK_INTERVAL_SECS};
use crate::tiling::TilingConfig;

use super::ConfigError;

/// The `[general]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralConfig {
    pub min_confidence: f32,
    pub iou_threshold: f32,
    pub inactive_check_interval: Duration,
    pub merge_policy: MergePolicy,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            inactive_check_interval: Duration::from_secs(DEFAULT_INACTIVE_CHECK_INTERVAL_SECS),
            merge_policy: MergePolicy::default(),
        }
    }
}

impl GeneralConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default().with_inactive_check_interval(self.inactive_check_interval)
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions::default()
            .with_min_confidence(self.min_confidence)
            .with_iou_threshold(self.iou_threshold)
            .with_merge_policy(self.merge_policy)
    }
}

/// Everything read from a configuration file.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub general: GeneralConfig,
    /// Backends in file order; the order breaks selection ties.
    pub backends: Vec<BackendDescriptor>,
    /// Tile plans ordered by id.
    pub plans: Vec<TilingConfig>,
}

impl AppConfig {
    /// Look up a tile plan by id.
    pub fn plan(&self, id: u32) -> Result<&TilingConfig, ConfigError> {
        self.plans
            .iter()
            .find(|p| p.id() == id)
            .ok_or(ConfigError::UnknownPlan(id))
    }

    /// The plan with the lowest id.
    pub fn default_plan(&self) -> Result<&TilingConfig, ConfigError> {
        self.plans.first().ok_or(ConfigError::NoPlans)
    }
}
