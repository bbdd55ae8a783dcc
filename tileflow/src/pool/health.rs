//! Liveness probing of inactive backends.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::BackendPool;
use crate::backend::Backend;

/// Probe each backend once, skipping any with a probe already running.
///
/// Returns how many probes succeeded.
pub(crate) async fn probe_all(backends: Vec<Arc<Backend>>) -> usize {
    let probes = backends.iter().map(|backend| async move {
        match backend.stats().try_begin_probe() {
            Some(_slot) => backend.probe().await,
            None => false,
        }
    });
    join_all(probes).await.into_iter().filter(|ok| *ok).count()
}

/// Periodic sweep loop behind [`BackendPool::spawn_health_monitor`].
pub(crate) fn spawn_health_monitor(
    pool: Arc<BackendPool>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(interval_secs = interval.as_secs_f64(), "Health monitor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Health monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let reactivated = pool.sweep_now().await;
                    if reactivated > 0 {
                        info!(reactivated, "Health monitor reactivated backends");
                    }
                }
            }
        }
    })
}
