//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unrecognised section [{0}]")]
    UnknownSection(String),

    #[error("[{section}] is missing required key '{key}'")]
    MissingKey { section: String, key: String },

    #[error("[{section}] {key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        reason: String,
    },

    #[error("backend '{name}': {reason}")]
    InvalidBackend { name: String, reason: String },

    #[error("tile plan '{0}' has no rows")]
    EmptyPlan(String),

    #[error("tile plan '{plan}': {reason}")]
    InvalidPlan { plan: String, reason: String },

    #[error("tile plan '{plan}' row {row}: {reason}")]
    InvalidTileRow {
        plan: String,
        row: usize,
        reason: String,
    },

    #[error("tile plan {0} is defined more than once")]
    DuplicatePlan(u32),

    #[error("no tile plans configured")]
    NoPlans,

    #[error("unknown tile plan {0}")]
    UnknownPlan(u32),
}

impl From<ini::ParseError> for ConfigError {
    fn from(e: ini::ParseError) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = ConfigError::InvalidTileRow {
            plan: "wide".to_string(),
            row: 2,
            reason: "height must be positive".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "tile plan 'wide' row 2: height must be positive"
        );

        let err = ConfigError::MissingKey {
            section: "backend.a".to_string(),
            key: "host".to_string(),
        };
        assert_eq!(err.to_string(), "[backend.a] is missing required key 'host'");
    }

    #[test]
    fn test_io_error_names_path() {
        let err = ConfigError::Io {
            path: PathBuf::from("/etc/tileflow.ini"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/etc/tileflow.ini"));
    }
}
