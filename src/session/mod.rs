//! Tool-server session: facade, supervisor, pending table, retry budget.
//!
//! [`ToolServerClient`] is the public surface every call site uses. It is a
//! cheap clone over channel endpoints; the heavy state lives in the
//! [`supervisor`] task spawned by [`ToolServerClient::start`]. Construct one
//! client at startup and pass it by reference or clone to consumers — the
//! "one shared connection" semantics come from the single supervisor, not
//! from any global.

pub mod backoff;
pub mod pending;
mod supervisor;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::session::supervisor::{Command, Supervisor};
use crate::{AppError, Result};

/// Connection lifecycle state, as published by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live tool-server process.
    Disconnected,
    /// Spawn plus readiness probe in progress.
    Connecting,
    /// Handshake complete; requests are accepted.
    Connected,
}

/// Lifecycle notifications delivered to the client's owner.
///
/// Delivery is lossy under backpressure: an observer that stops draining the
/// channel loses events instead of stalling the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Handshake completed; the session is live.
    Connected,
    /// The session went down — explicit disconnect or connection loss.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// Automatic reconnection gave up after the configured attempt budget.
    /// Fires once per failure streak; a later explicit [`ToolServerClient::connect`]
    /// starts a new streak.
    ConnectionFailed {
        /// Failed attempts in the exhausted streak.
        attempts: u32,
    },
}

/// Point-in-time connection statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Whether the session is currently connected.
    pub connected: bool,
    /// Requests awaiting a response.
    pub pending_requests: usize,
    /// Consecutive failed connection attempts in the current streak.
    pub retry_attempts: u32,
}

/// Handle to a tool-server session.
///
/// All methods funnel through the supervisor task; clones share the same
/// session. Dropping every clone (or calling [`ToolServerClient::shutdown`])
/// stops the supervisor and terminates the child process.
#[derive(Debug, Clone)]
pub struct ToolServerClient {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl ToolServerClient {
    /// Spawn the session supervisor and return the client handle plus the
    /// lifecycle-event receiver.
    ///
    /// Must be called from within a tokio runtime. No connection is made
    /// until [`ToolServerClient::connect`].
    #[must_use]
    pub fn start(config: BridgeConfig) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor::new(config, cmd_rx, state_tx, event_tx, cancel.clone());
        tokio::spawn(supervisor.run());

        (
            Self {
                cmd_tx,
                state_rx,
                cancel,
            },
            event_rx,
        )
    }

    /// Establish the connection: spawn the tool server, run the readiness
    /// probe, and start accepting requests. No-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns the spawn or handshake error of this attempt. A failed
    /// attempt also arms the automatic retry path; the error is still
    /// surfaced so the caller can react immediately.
    pub async fn connect(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Connect { reply: reply_tx })
            .await?;
        reply_rx
            .await
            .map_err(|_| supervisor_gone())?
    }

    /// Invoke a domain operation and await its matched response.
    ///
    /// The request is multiplexed over the shared stream under a fresh
    /// correlation id; any number of calls may be in flight concurrently and
    /// each resolves with its own response regardless of arrival order.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotConnected`] — session is not `Connected`.
    /// - [`AppError::RequestTimeout`] — no response within the configured
    ///   deadline; the request was evicted locally.
    /// - [`AppError::Remote`] — the server answered with an error envelope.
    /// - [`AppError::ConnectionLost`] / [`AppError::Disconnected`] — the
    ///   session went down while the request was pending.
    pub async fn send_request(&self, operation: &str, arguments: Value) -> Result<Value> {
        if !self.is_connection_active() {
            return Err(AppError::NotConnected(format!(
                "cannot invoke '{operation}' while disconnected"
            )));
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Send {
            operation: operation.to_owned(),
            arguments,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| supervisor_gone())?
    }

    /// Tear the session down and stay down; pending requests are rejected
    /// with a "client disconnected" error. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotConnected`] only when the supervisor task is
    /// already gone, which a shutdown-path caller may safely ignore.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Disconnect { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| supervisor_gone())
    }

    /// Whether the session is currently `Connected` with a live process.
    #[must_use]
    pub fn is_connection_active(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Snapshot of connection statistics.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotConnected`] when the supervisor task is gone.
    pub async fn connection_stats(&self) -> Result<ConnectionStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Stats { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| supervisor_gone())
    }

    /// Stop the supervisor task outright, terminating any live child.
    ///
    /// Prefer [`ToolServerClient::disconnect`] for an orderly close; this is
    /// the end-of-process hatch.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send_command(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| supervisor_gone())
    }
}

fn supervisor_gone() -> AppError {
    AppError::NotConnected("session supervisor stopped".into())
}
