//! Configuration module for tak-relay.
//!
//! The port comes from the command line. Everything else has a default and
//! may be overridden by a TOML file named in the `TAK_RELAY_CONFIG`
//! environment variable.

use crate::error::ConfigError;
use crate::runtime::DEFAULT_TERMINATOR;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_ENV: &str = "TAK_RELAY_CONFIG";

/// Command-line arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "tak-relay")]
#[command(version = "0.1.0")]
#[command(about = "Relays terminator-delimited event messages to every connected client", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on
    pub port: u16,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and event loop settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Upper bound on each readiness wait, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            backlog: default_backlog(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Message framing settings
#[derive(Debug, Deserialize)]
pub struct FramingConfig {
    /// Marker whose last byte ends a message
    #[serde(default = "default_terminator")]
    pub terminator: String,
    /// Receive chunk size and initial buffer capacity
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            terminator: default_terminator(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_backlog() -> i32 {
    1024
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_terminator() -> String {
    String::from_utf8_lossy(DEFAULT_TERMINATOR).into_owned()
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub poll_interval: Duration,
    pub terminator: Vec<u8>,
    pub chunk_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and the optional TOML file.
    ///
    /// A missing or malformed port is reported by clap, which exits with a
    /// usage error.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => read_toml(Path::new(&path))?,
            None => TomlConfig::default(),
        };

        Self::resolve(cli.port, toml_config)
    }

    /// Merge the port with file settings and check the result.
    pub fn resolve(port: u16, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            server,
            framing,
            logging,
        } = toml_config;

        if framing.terminator.is_empty() {
            return Err(ConfigError::Invalid("framing.terminator must not be empty"));
        }
        if framing.chunk_size == 0 {
            return Err(ConfigError::Invalid("framing.chunk_size must be positive"));
        }
        if server.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.poll_interval_ms must be positive",
            ));
        }

        Ok(Config {
            host: server.host,
            port,
            backlog: server.backlog,
            poll_interval: Duration::from_millis(server.poll_interval_ms),
            terminator: framing.terminator.into_bytes(),
            chunk_size: framing.chunk_size,
            log_level: logging.level,
        })
    }

    /// Address string the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn read_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: PathBuf::from(path),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
        path: PathBuf::from(path),
        source,
    })
}
