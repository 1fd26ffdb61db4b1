//! Configuration module for the pollkv server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::error::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "pollkv")]
#[command(version)]
#[command(about = "A single-threaded key/value server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:1234)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of simultaneous connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Upper bound on how long one poll waits, in milliseconds
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,

    /// Readiness events handled per poll
    #[arg(long)]
    pub event_capacity: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            poll_timeout_ms: default_poll_timeout_ms(),
            event_capacity: default_event_capacity(),
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

fn default_listen() -> String {
    "0.0.0.0:1234".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_backlog() -> i32 {
    1024
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_event_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub backlog: i32,
    pub poll_timeout_ms: u64,
    pub event_capacity: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 1234)),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            poll_timeout_ms: default_poll_timeout_ms(),
            event_capacity: default_event_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = match cli.config {
            Some(ref path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
                        path: path.clone(),
                        source,
                    })?;
                toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                    path: path.clone(),
                    source,
                })?
            }
            None => TomlConfig::default(),
        };

        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse::<SocketAddr>()
            .map_err(|source| ConfigError::InvalidListen {
                addr: listen.clone(),
                source,
            })?;

        Ok(Config {
            listen,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            poll_timeout_ms: cli
                .poll_timeout_ms
                .unwrap_or(toml_config.server.poll_timeout_ms),
            event_capacity: cli
                .event_capacity
                .unwrap_or(toml_config.server.event_capacity),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}
