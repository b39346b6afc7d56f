#![forbid(unsafe_code)]

//! Stdio JSON-RPC client bridge for the compliance tool server.
//!
//! The tool server is a long-lived child process speaking newline-delimited
//! JSON over its standard streams. This crate multiplexes concurrent logical
//! requests over that single stream: it frames lines, correlates responses
//! by id, enforces per-request deadlines, and survives process death with
//! bounded exponential-backoff reconnection.
//!
//! Construct one [`ToolServerClient`] at startup and pass it (or clones of
//! it) to every consumer.

pub mod config;
pub mod errors;
pub mod session;
pub mod transport;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
pub use session::{ClientEvent, ConnectionState, ConnectionStats, ToolServerClient};
