//! Stdio transport for the tool-server process.
//!
//! Covers everything between a [`serde_json::Value`] envelope and the child
//! process's byte streams: spawning with piped stdio, newline framing,
//! envelope encoding/decoding, the readiness handshake, and the per-line
//! reader task. Session-level concerns (correlation, timeouts, reconnection)
//! live in [`crate::session`].

pub mod codec;
pub mod envelope;
pub mod handshake;
pub mod reader;
pub mod spawner;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;

use crate::Result;

/// Events emitted by the per-connection reader task into the session
/// supervisor.
#[derive(Debug)]
pub enum TransportEvent {
    /// One complete line was framed from the tool server's stdout.
    LineReceived(String),
    /// The stdout stream ended (EOF or unrecoverable I/O error).
    StreamClosed {
        /// Human-readable cause for logging and pending-request rejection.
        reason: String,
    },
}

/// Serialise `value` to a compact JSON string, append `\n`, and write the
/// resulting line to the tool server's stdin.
///
/// # Errors
///
/// Returns [`AppError::Io`](crate::AppError::Io) if serialisation or the
/// stdin write fails (e.g. the process has exited).
pub async fn write_line(stdin: &mut ChildStdin, value: &Value) -> Result<()> {
    let mut bytes = serde_json::to_vec(value)
        .map_err(|err| crate::AppError::Io(format!("json serialisation failed: {err}")))?;
    bytes.push(b'\n');
    stdin
        .write_all(&bytes)
        .await
        .map_err(|err| crate::AppError::Io(format!("write to tool server failed: {err}")))?;
    Ok(())
}
