//! Pool configuration.

use std::time::Duration;

/// Minimum time an inactive backend waits between probes (seconds).
pub const DEFAULT_INACTIVE_CHECK_INTERVAL_SECS: u64 = 30;

/// Configuration for the backend pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// How long an inactive backend must have been unseen, and unprobed,
    /// before it is probed again (default: 30s).
    pub inactive_check_interval: Duration,
    /// Launch a background probe sweep on every selection (default: true).
    pub sweep_on_select: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            inactive_check_interval: Duration::from_secs(DEFAULT_INACTIVE_CHECK_INTERVAL_SECS),
            sweep_on_select: true,
        }
    }
}

impl PoolConfig {
    pub fn with_inactive_check_interval(mut self, interval: Duration) -> Self {
        self.inactive_check_interval = interval;
        self
    }

    pub fn with_sweep_on_select(mut self, enabled: bool) -> Self {
        self.sweep_on_select = enabled;
        self
    }
}
