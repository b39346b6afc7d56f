//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all transport failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Tool-server process could not be spawned.
    Spawn(String),
    /// Readiness probe failed or timed out after spawn.
    Handshake(String),
    /// Request submitted while the session is not connected.
    NotConnected(String),
    /// No response arrived for a request within its deadline.
    RequestTimeout(String),
    /// Inbound line could not be decoded as a wire envelope.
    Protocol(String),
    /// Session was closed by an explicit disconnect while the request
    /// was still pending.
    Disconnected(String),
    /// Tool-server process died or its stream closed while the request
    /// was still pending.
    ConnectionLost(String),
    /// Automatic reconnection gave up after the configured attempt budget.
    RetriesExhausted(String),
    /// The tool server answered with an error envelope.
    Remote(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::NotConnected(msg) => write!(f, "not connected: {msg}"),
            Self::RequestTimeout(msg) => write!(f, "request timeout: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Disconnected(msg) => write!(f, "client disconnected: {msg}"),
            Self::ConnectionLost(msg) => write!(f, "connection lost: {msg}"),
            Self::RetriesExhausted(msg) => write!(f, "connection failed: {msg}"),
            Self::Remote(msg) => write!(f, "server error: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
