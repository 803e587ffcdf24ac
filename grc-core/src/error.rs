/// Structured error types for grc-core.
///
/// Binaries wrap these with `anyhow`; the server maps them onto HTTP status codes.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::backlog::TransitionError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Config file exists but is not valid TOML
    #[error("Invalid config file {path:?}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl CoreError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = CoreError::config("keep_days must be positive");
        assert_eq!(err.to_string(), "Configuration error: keep_days must be positive");

        let err: CoreError = ValidationError::Empty { field: "title" }.into();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: CoreError = io_err.into();
        assert!(matches!(err, CoreError::Io { .. }));
    }
}
