//! CLI error type.

use std::path::PathBuf;

use thiserror::Error;
use tileflow::config::ConfigError;
use tileflow::dispatch::DispatchError;

/// Errors that end a CLI invocation with a non-zero exit code.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("detection failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] serde_json::Error),
}
