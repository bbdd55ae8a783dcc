//! Backend pool: least-loaded selection and health recovery.
//!
//! ```text
//!            select()
//!               │
//!   ┌───────────┴────────────┐
//!   │ spawn probe sweep      │  inactive, unseen and unprobed for
//!   │ (background, no wait)  │  inactive_check_interval, one probe
//!   └───────────┬────────────┘  in flight per backend
//!               ▼
//!   min over active backends of
//!   (latency * active_calls, active_calls, latency, position)
//! ```

mod config;
mod health;
mod selector;

pub use config::{PoolConfig, DEFAULT_INACTIVE_CHECK_INTERVAL_SECS};
pub use selector::BackendPool;
