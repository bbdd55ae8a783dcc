//! Per-backend health and latency accounting.
//!
//! Every backend carries one [`BackendStats`]. The dispatcher reads it to
//! pick the least-loaded backend and the pool reads it to decide which
//! inactive backends are due for a liveness probe.
//!
//! # State Machine
//!
//! ```text
//! Active --[call fails: network, timeout, status, bad body]--> Inactive
//! Inactive --[probe succeeds]--> Active
//! Inactive --[call succeeds]--> Active
//! ```
//!
//! Deactivation zeroes the rolling latency, so a reactivated backend starts
//! fresh and is attractive to the selector until its first sample arrives.
//!
//! # Thread Safety
//!
//! Call counters are atomics; the latency, flag and timestamps live behind a
//! single mutex so readers always see a consistent snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Internal mutable state.
#[derive(Debug)]
struct HealthState {
    rolling_latency_ms: f64,
    is_active: bool,
    last_active: Option<Instant>,
    last_probe: Option<Instant>,
}

/// Health and load counters for one backend.
#[derive(Debug)]
pub struct BackendStats {
    ema_alpha: f64,
    active_calls: AtomicUsize,
    /// Successful calls.
    total_calls: AtomicU64,
    failed_calls: AtomicU64,
    probe_in_flight: AtomicBool,
    state: Mutex<HealthState>,
}

impl BackendStats {
    /// Fresh stats: active, no latency samples, no calls.
    pub fn new(ema_alpha: f64) -> Self {
        Self {
            ema_alpha,
            active_calls: AtomicUsize::new(0),
            total_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            state: Mutex::new(HealthState {
                rolling_latency_ms: 0.0,
                is_active: true,
                last_active: None,
                last_probe: None,
            }),
        }
    }

    /// Count a call as in flight until the returned guard drops.
    pub fn begin_call(&self) -> ActiveCallGuard<'_> {
        self.active_calls.fetch_add(1, Ordering::SeqCst);
        ActiveCallGuard {
            counter: &self.active_calls,
        }
    }

    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::Relaxed)
    }

    pub fn rolling_latency_ms(&self) -> f64 {
        self.state.lock().rolling_latency_ms
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().is_active
    }

    pub fn last_active(&self) -> Option<Instant> {
        self.state.lock().last_active
    }

    /// Fold one per-image latency sample into the moving average.
    ///
    /// The first sample after a reset replaces the average outright.
    pub fn record_success(&self, per_image: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let sample = per_image.as_secs_f64() * 1000.0;
        let mut state = self.state.lock();
        state.rolling_latency_ms = if state.rolling_latency_ms == 0.0 {
            sample
        } else {
            (1.0 - self.ema_alpha) * state.rolling_latency_ms + self.ema_alpha * sample
        };
        state.is_active = true;
        state.last_active = Some(Instant::now());
    }

    /// Mark the backend unusable and forget its latency.
    pub fn record_failure(&self) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.is_active = false;
        state.rolling_latency_ms = 0.0;
    }

    /// Mark the backend usable again after a successful probe.
    pub fn activate(&self) {
        let mut state = self.state.lock();
        state.is_active = true;
        state.last_active = Some(Instant::now());
    }

    /// Ordering key for selection, `None` while inactive.
    ///
    /// Returns `(rolling_latency_ms * active_calls, active_calls,
    /// rolling_latency_ms)`, compared in that order.
    pub fn selection_key(&self) -> Option<(f64, usize, f64)> {
        let state = self.state.lock();
        if !state.is_active {
            return None;
        }
        let active = self.active_calls();
        let latency = state.rolling_latency_ms;
        Some((latency * active as f64, active, latency))
    }

    /// Whether an inactive backend should be probed now.
    ///
    /// Due when no probe is in flight and neither the last time the backend
    /// was seen alive nor the last probe is more recent than `interval`.
    pub fn needs_probe(&self, interval: Duration, now: Instant) -> bool {
        if self.probe_in_flight.load(Ordering::SeqCst) {
            return false;
        }
        let state = self.state.lock();
        if state.is_active {
            return false;
        }
        let elapsed = |at: Option<Instant>| {
            at.map_or(true, |at| now.saturating_duration_since(at) >= interval)
        };
        elapsed(state.last_active) && elapsed(state.last_probe)
    }

    /// Claim the single probe slot for this backend.
    ///
    /// Returns `None` when a probe is already running.
    pub fn try_begin_probe(&self) -> Option<ProbeGuard<'_>> {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.state.lock().last_probe = Some(Instant::now());
        Some(ProbeGuard {
            flag: &self.probe_in_flight,
        })
    }
}

/// Decrements the active call counter on drop, on every exit path.
#[derive(Debug)]
pub struct ActiveCallGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for ActiveCallGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Releases the probe slot on drop.
#[derive(Debug)]
pub struct ProbeGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
