//! Error types shared across the server.

use std::path::PathBuf;
use thiserror::Error;

/// Wire protocol violations.
///
/// Any of these is fatal to the connection that produced it, and only to
/// that connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Declared request length is over the protocol limit.
    #[error("message too long: {len} bytes")]
    MessageTooLong { len: usize },

    /// Declared argument count is over the protocol limit.
    #[error("too many arguments: {argc}")]
    TooManyArgs { argc: usize },

    /// A length field points past the end of the payload.
    #[error("truncated payload")]
    Truncated,

    /// Bytes left over after the last argument.
    #[error("{remaining} trailing bytes after last argument")]
    TrailingBytes { remaining: usize },

    /// Encoded response would not fit the write buffer.
    #[error("response too large: {len} bytes")]
    ResponseTooLarge { len: usize },
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid listen address '{addr}': {source}")]
    InvalidListen {
        addr: String,
        source: std::net::AddrParseError,
    },
}
