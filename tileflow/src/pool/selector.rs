//! Least-loaded backend selection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::PoolConfig;
use super::health::{self, probe_all};
use crate::backend::{Backend, BackendDescriptor, BackendStatus};
use crate::config::ConfigError;

/// An ordered set of backends with least-loaded selection.
///
/// Selection prefers the active backend with the smallest
/// `rolling_latency_ms * active_calls`, then the fewest active calls, then
/// the lowest rolling latency, then the earliest position in the pool. Among
/// idle backends the fastest one wins; a fresh backend (no latency yet)
/// counts as fastest.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tileflow::backend::{BackendDescriptor, ProtocolKind};
/// use tileflow::pool::{BackendPool, PoolConfig};
///
/// let pool = BackendPool::from_descriptors(
///     vec![
///         BackendDescriptor::new("a", "10.0.0.1", 32168, ProtocolKind::Upload),
///         BackendDescriptor::new("b", "10.0.0.2", 32168, ProtocolKind::Upload),
///     ],
///     PoolConfig::default().with_sweep_on_select(false),
/// )
/// .unwrap();
///
/// // Both idle: the first one wins the tie.
/// assert_eq!(pool.select().unwrap().name(), "a");
/// ```
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    config: PoolConfig,
}

impl BackendPool {
    pub fn new(backends: Vec<Backend>, config: PoolConfig) -> Self {
        Self {
            backends: backends.into_iter().map(Arc::new).collect(),
            config,
        }
    }

    /// Validate descriptors and build a reqwest-backed backend for each.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBackend`] for an invalid descriptor, a
    /// duplicate name or an HTTP client that cannot be created.
    pub fn from_descriptors(
        descriptors: Vec<BackendDescriptor>,
        config: PoolConfig,
    ) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        let mut backends = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            descriptor.validate()?;
            if !names.insert(descriptor.name.clone()) {
                return Err(ConfigError::InvalidBackend {
                    name: descriptor.name,
                    reason: "duplicate backend name".to_string(),
                });
            }
            let name = descriptor.name.clone();
            let backend = Backend::new(descriptor).map_err(|e| ConfigError::InvalidBackend {
                name,
                reason: e.to_string(),
            })?;
            backends.push(backend);
        }

        if backends.is_empty() {
            warn!("Backend pool is empty, every tile will go unserved");
        }
        Ok(Self::new(backends, config))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Backend>> {
        self.backends.iter().find(|b| b.name() == name)
    }

    /// Number of backends currently marked active.
    pub fn active_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_active()).count()
    }

    /// Pick the backend for the next call, or `None` if none is active.
    ///
    /// When enabled, first launches a background probe of inactive backends
    /// that are due. The sweep never delays the selection, so a backend it
    /// revives only becomes eligible for later calls.
    pub fn select(&self) -> Option<Arc<Backend>> {
        if self.config.sweep_on_select {
            self.spawn_sweep();
        }
        self.least_loaded()
    }

    fn least_loaded(&self) -> Option<Arc<Backend>> {
        self.backends
            .iter()
            .enumerate()
            .filter_map(|(index, backend)| {
                backend
                    .stats()
                    .selection_key()
                    .map(|(score, active, latency)| (score, active, latency, index, backend))
            })
            .min_by(|a, b| {
                a.0.total_cmp(&b.0)
                    .then(a.1.cmp(&b.1))
                    .then(a.2.total_cmp(&b.2))
                    .then(a.3.cmp(&b.3))
            })
            .map(|(_, _, _, _, backend)| Arc::clone(backend))
    }

    fn due_for_probe(&self) -> Vec<Arc<Backend>> {
        let now = Instant::now();
        self.backends
            .iter()
            .filter(|b| b.stats().needs_probe(self.config.inactive_check_interval, now))
            .cloned()
            .collect()
    }

    fn spawn_sweep(&self) {
        let due = self.due_for_probe();
        if due.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(count = due.len(), "Probing inactive backends");
                handle.spawn(probe_all(due));
            }
            Err(_) => debug!("No async runtime, skipping backend probe sweep"),
        }
    }

    /// Probe every inactive backend that is due and wait for the results.
    ///
    /// Returns how many backends answered.
    pub async fn sweep_now(&self) -> usize {
        let due = self.due_for_probe();
        if due.is_empty() {
            return 0;
        }
        probe_all(due).await
    }

    /// Probe every backend, active or not, and wait for the answers.
    ///
    /// Results follow pool order. A successful probe reactivates its
    /// backend; a failed one is only reported, since an active backend may
    /// still be serving calls.
    pub async fn check_all(&self) -> Vec<bool> {
        join_all(self.backends.iter().map(|b| b.probe())).await
    }

    /// Sweep every `interval` on a background task until `shutdown` is
    /// cancelled.
    ///
    /// Complements the sweep done on selection: without traffic nothing
    /// else would bring a recovered backend back.
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        health::spawn_health_monitor(Arc::clone(self), interval, shutdown)
    }

    pub fn status(&self) -> Vec<BackendStatus> {
        self.backends.iter().map(|b| b.status()).collect()
    }
}
