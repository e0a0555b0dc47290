use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::ConnectionId;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed to '{addr}': {reason}")]
    ConnectionFailed { addr: String, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    RecvFailed(String),

    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Truncated frame: field '{field}' needs {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Field '{0}' is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("Unknown message type: '{0}'")]
    UnknownMessageType(String),

    #[error("Negative payload length: {0}")]
    NegativeLength(i32),

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    #[error("Message too large: {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },
}

/// A frame that decoded cleanly but violates the protocol contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid magic '{0}'")]
    InvalidMagic(String),

    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(i32),

    #[error("Missing sender")]
    EmptySender,

    #[error("Invalid timestamp {0}")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("No workers registered after waiting {waited:?}")]
    NoWorkers { waited: Duration },

    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("Connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("Connection {0} has closed its outbound channel")]
    ConnectionClosed(ConnectionId),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Failed to listen on {addr}: {reason}")]
    ListenFailed { addr: String, reason: String },

    #[error("Coordinator is already listening")]
    AlreadyListening,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}
