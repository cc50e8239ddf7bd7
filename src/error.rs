//! Error types for startup and the event loop.
//!
//! Per-connection failures never appear here: they close the participant
//! and are logged where they happen.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead { path: PathBuf, source: io::Error },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Fatal relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listener could not be created; the port may already be in use.
    #[error("unable to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// A receive buffer could not grow.
    #[error("unable to grow receive buffer to {requested} bytes")]
    Alloc { requested: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
