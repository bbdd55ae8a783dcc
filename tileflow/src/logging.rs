//! Tracing subscriber setup for binaries.
//!
//! The library only emits `tracing` events; a binary calls [`init`] once at
//! startup to print them.

use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Build the event filter: `RUST_LOG` if set, `default_directive` otherwise.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a stderr subscriber with local RFC 3339 timestamps.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init(default_directive: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(LocalTime::rfc_3339())
                .with_target(true),
        )
        .try_init()
}
