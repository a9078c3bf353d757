//! Configuration error vocabulary.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("failed to merge configuration sources: {0}")]
    MergeError(String),

    #[error("invalid configuration: {0}")]
    ValidationError(String),

    #[error("invalid environment variable configuration: {0}")]
    EnvError(String),

    #[error("could not determine XDG directories: {0}")]
    XdgError(String),
}
