//! Configuration: INI loading, validation and the resulting settings.
//!
//! A file has one optional `[general]` section, any number of
//! `[backend.<name>]` sections and one or more tile plans. A plan is an
//! optional `[plan.<id>]` header plus `[plan.<id>.row.<n>]` sections,
//! applied in ascending `n`:
//!
//! ```ini
//! [general]
//! min_confidence = 0.4
//! merge_policy = per_label
//!
//! [backend.gpu-a]
//! type = upload
//! host = 10.0.0.5
//! port = 32168
//!
//! [plan.1]
//! name = wide
//!
//! [plan.1.row.0]
//! y = 0
//! height = 1000
//! width = 1200
//! overlap = 0.1
//! scale_width = 640
//! ```

mod error;
mod loader;
mod settings;

pub use error::ConfigError;
pub use loader::{load, parse};
pub use settings::{AppConfig, GeneralConfig};
