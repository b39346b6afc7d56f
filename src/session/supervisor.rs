//! Session supervisor task.
//!
//! The single logical owner of all transport state: the connection state,
//! the pending-request table, the retry budget, and the live child handles.
//! Facade calls, transport events from the reader task, timer wakeups, and
//! child exit are multiplexed through one `select!` loop, so no two handlers
//! that touch the table or the state ever run concurrently and nothing here
//! needs a lock.
//!
//! Timer wakeups are fired by detached tasks posting back into the loop:
//! a request deadline whose correlation id is no longer pending is ignored,
//! and reconnect wakeups carry an epoch that explicit `connect`/`disconnect`
//! calls advance to invalidate stale schedules.

use serde_json::Value;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::session::backoff::RetryBudget;
use crate::session::pending::PendingTable;
use crate::session::{ClientEvent, ConnectionState, ConnectionStats};
use crate::transport::{envelope, handshake, reader, spawner, write_line, TransportEvent};
use crate::{AppError, Result};

/// Facade → supervisor commands.
#[derive(Debug)]
pub(crate) enum Command {
    /// Establish the connection; no-op when already connected.
    Connect {
        /// Resolution of this connection attempt.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Invoke a domain operation on the tool server.
    Send {
        /// Domain operation name.
        operation: String,
        /// Operation arguments, forwarded verbatim.
        arguments: Value,
        /// Caller's completion channel; registered in the pending table.
        reply: oneshot::Sender<Result<Value>>,
    },
    /// Tear the connection down and stay down (no automatic reconnect).
    Disconnect {
        /// Acknowledged once teardown finished.
        reply: oneshot::Sender<()>,
    },
    /// Snapshot connection statistics.
    Stats {
        /// Receives the snapshot.
        reply: oneshot::Sender<ConnectionStats>,
    },
}

/// Wakeups posted back into the supervisor by detached timer tasks.
#[derive(Debug)]
enum TimerEvent {
    /// A request's response deadline elapsed.
    RequestDeadline { correlation_id: String },
    /// A scheduled reconnection attempt is due.
    ReconnectDue { epoch: u64 },
}

/// Live child process plus its per-connection tasks.
struct ActiveConnection {
    child: Child,
    stdin: ChildStdin,
    cancel: CancellationToken,
    reader_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

/// The supervisor actor. Constructed by [`crate::ToolServerClient::start`]
/// and consumed by [`Supervisor::run`].
pub(crate) struct Supervisor {
    config: BridgeConfig,
    cmd_rx: mpsc::Receiver<Command>,
    /// Receiver for the *current* connection's reader; replaced per connect
    /// so events from a torn-down connection cannot reach a new one.
    transport_rx: Option<mpsc::Receiver<TransportEvent>>,
    timer_tx: mpsc::Sender<TimerEvent>,
    timer_rx: mpsc::Receiver<TimerEvent>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
    pending: PendingTable,
    budget: RetryBudget,
    conn: Option<ActiveConnection>,
    reconnect_epoch: u64,
    failure_signal_sent: bool,
}

impl Supervisor {
    /// Assemble a supervisor around the channel endpoints owned by the facade.
    pub(crate) fn new(
        config: BridgeConfig,
        cmd_rx: mpsc::Receiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        event_tx: mpsc::Sender<ClientEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::channel(64);
        let budget = RetryBudget::new(&config.retry);
        Self {
            config,
            cmd_rx,
            transport_rx: None,
            timer_tx,
            timer_rx,
            state_tx,
            event_tx,
            cancel,
            pending: PendingTable::new(),
            budget,
            conn: None,
            reconnect_epoch: 0,
            failure_signal_sent: false,
        }
    }

    /// Event loop. Runs until the facade is dropped or shut down.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    self.shutdown().await;
                    return;
                }

                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            // Every facade handle dropped.
                            self.shutdown().await;
                            return;
                        }
                    }
                }

                Some(event) = recv_transport(&mut self.transport_rx) => {
                    self.handle_transport_event(event).await;
                }

                Some(timer) = self.timer_rx.recv() => {
                    self.handle_timer(timer).await;
                }

                status = wait_child(&mut self.conn) => {
                    self.handle_process_exit(status).await;
                }
            }
        }
    }

    // ── Command handling ─────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => {
                if self.is_connected() {
                    let _ = reply.send(Ok(()));
                    return;
                }
                // An explicit connect supersedes any scheduled auto-retry.
                self.reconnect_epoch += 1;
                match self.establish_connection().await {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        self.register_connection_failure();
                        let err = if self.budget.exhausted() {
                            AppError::RetriesExhausted(format!(
                                "{} consecutive failed attempts, last error: {err}",
                                self.budget.attempts()
                            ))
                        } else {
                            err
                        };
                        let _ = reply.send(Err(err));
                    }
                }
            }
            Command::Send {
                operation,
                arguments,
                reply,
            } => {
                self.handle_send(operation, &arguments, reply).await;
            }
            Command::Disconnect { reply } => {
                self.handle_disconnect().await;
                let _ = reply.send(());
            }
            Command::Stats { reply } => {
                let _ = reply.send(ConnectionStats {
                    connected: self.is_connected(),
                    pending_requests: self.pending.len(),
                    retry_attempts: self.budget.attempts(),
                });
            }
        }
    }

    async fn handle_send(
        &mut self,
        operation: String,
        arguments: &Value,
        reply: oneshot::Sender<Result<Value>>,
    ) {
        if !self.is_connected() {
            let _ = reply.send(Err(AppError::NotConnected(format!(
                "cannot invoke '{operation}' while disconnected"
            ))));
            return;
        }
        let Some(conn) = self.conn.as_mut() else {
            let _ = reply.send(Err(AppError::NotConnected(format!(
                "cannot invoke '{operation}' while disconnected"
            ))));
            return;
        };

        let correlation_id = Uuid::new_v4().to_string();
        let request = envelope::invoke_request(&correlation_id, &operation, arguments);

        match write_line(&mut conn.stdin, &request).await {
            Ok(()) => {
                debug!(correlation_id, operation, "request written");
                self.pending
                    .insert(correlation_id.clone(), operation, reply);
                self.arm_request_deadline(correlation_id);
            }
            Err(err) => {
                // Likely the process just died; the exit event will follow
                // and handle teardown. This caller gets the write error.
                warn!(operation, %err, "request write failed");
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Explicit disconnect: teardown, bulk-reject with "client disconnected",
    /// stay down. Idempotent — a second call finds no connection and only
    /// reasserts the state.
    async fn handle_disconnect(&mut self) {
        self.reconnect_epoch += 1;
        let Some(conn) = self.conn.take() else {
            self.set_state(ConnectionState::Disconnected);
            return;
        };
        self.teardown(conn).await;
        self.pending.reject_all(|operation| {
            AppError::Disconnected(format!("'{operation}' abandoned by disconnect"))
        });
        self.emit(ClientEvent::Disconnected {
            reason: "client disconnect".to_owned(),
        });
        info!("tool server session disconnected");
    }

    // ── Connection lifecycle ─────────────────────────────────────────────────

    /// One connection attempt: spawn, probe, wire tasks, publish state.
    async fn establish_connection(&mut self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        match self.try_connect().await {
            Ok(()) => {
                self.budget.reset();
                self.failure_signal_sent = false;
                self.set_state(ConnectionState::Connected);
                self.emit(ClientEvent::Connected);
                info!("tool server session connected");
                Ok(())
            }
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(%err, "connection attempt failed");
                Err(err)
            }
        }
    }

    async fn try_connect(&mut self) -> Result<()> {
        let spawner::ServerProcess {
            mut child,
            mut stdin,
            stdout,
            stderr,
        } = spawner::spawn_server(&self.config)?;

        let mut buffered_stdout = BufReader::new(stdout);

        if let Err(err) = handshake::send_probe(&mut stdin).await {
            spawner::terminate(&mut child).await;
            return Err(err);
        }
        if let Err(err) =
            handshake::wait_for_ready(&mut buffered_stdout, self.config.handshake_timeout()).await
        {
            spawner::terminate(&mut child).await;
            return Err(err);
        }

        let conn_cancel = self.cancel.child_token();
        let (transport_tx, transport_rx) = mpsc::channel(64);
        let reader_task = tokio::spawn(reader::run_reader(
            buffered_stdout,
            transport_tx,
            conn_cancel.clone(),
        ));
        let stderr_task = tokio::spawn(reader::run_stderr_logger(stderr, conn_cancel.clone()));

        self.transport_rx = Some(transport_rx);
        self.conn = Some(ActiveConnection {
            child,
            stdin,
            cancel: conn_cancel,
            reader_task,
            stderr_task,
        });
        Ok(())
    }

    /// Abnormal loss (process exit or stream close): teardown, bulk-reject
    /// with "connection lost", then enter the retry path.
    async fn handle_connection_loss(&mut self, reason: &str) {
        let Some(conn) = self.conn.take() else {
            // Exit and stream-close can both fire for one loss; the second
            // observer finds the connection already gone.
            return;
        };
        warn!(
            reason,
            pending = self.pending.len(),
            "tool server connection lost"
        );
        self.teardown(conn).await;
        self.pending
            .reject_all(|_| AppError::ConnectionLost(reason.to_owned()));
        self.emit(ClientEvent::Disconnected {
            reason: reason.to_owned(),
        });
        self.register_connection_failure();
    }

    /// Shared teardown: cancel per-connection tasks, terminate the child,
    /// publish `Disconnected`.
    async fn teardown(&mut self, mut conn: ActiveConnection) {
        self.transport_rx = None;
        conn.cancel.cancel();
        spawner::terminate(&mut conn.child).await;
        conn.reader_task.abort();
        conn.stderr_task.abort();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Retry path: count the failure, then either schedule the next attempt
    /// or surface the terminal failure signal.
    fn register_connection_failure(&mut self) {
        self.budget.record_failure();
        if self.budget.exhausted() {
            self.emit_terminal_failure();
        } else {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.budget.current_delay();
        let epoch = self.reconnect_epoch;
        let timer_tx = self.timer_tx.clone();
        let cancel = self.cancel.clone();
        info!(
            ?delay,
            attempt = self.budget.attempts(),
            "scheduling reconnection"
        );
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = timer_tx.send(TimerEvent::ReconnectDue { epoch }).await;
                }
            }
        });
    }

    /// Emit `ConnectionFailed` once per failure streak.
    fn emit_terminal_failure(&mut self) {
        if self.failure_signal_sent {
            return;
        }
        self.failure_signal_sent = true;
        warn!(
            attempts = self.budget.attempts(),
            "reconnection budget exhausted, giving up"
        );
        self.emit(ClientEvent::ConnectionFailed {
            attempts: self.budget.attempts(),
        });
    }

    // ── Inbound traffic ──────────────────────────────────────────────────────

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LineReceived(line) => self.handle_line(&line),
            TransportEvent::StreamClosed { reason } => {
                self.handle_connection_loss(&reason).await;
            }
        }
    }

    /// Decode one line and route it to its pending request.
    ///
    /// Malformed lines and unknown correlation ids are logged and dropped —
    /// neither may disturb other in-flight requests.
    fn handle_line(&mut self, line: &str) {
        let decoded = match envelope::decode_line(line) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%err, raw_line = line, "discarding undecodable line");
                return;
            }
        };

        let Some(correlation_id) = decoded.correlation_id() else {
            debug!("ignoring envelope without correlation id (notification?)");
            return;
        };

        let outcome = match decoded.error {
            Some(remote) => Err(AppError::Remote(remote.describe())),
            None => Ok(envelope::unwrap_payload(
                decoded.result.unwrap_or(Value::Null),
            )),
        };

        if !self.pending.complete(&correlation_id, outcome) {
            debug!(
                correlation_id,
                "response for unknown correlation id, ignoring"
            );
        }
    }

    // ── Timers and process exit ──────────────────────────────────────────────

    async fn handle_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::RequestDeadline { correlation_id } => {
                let Some(entry) = self.pending.evict(&correlation_id) else {
                    // Completed before the deadline fired.
                    return;
                };
                let operation = entry.operation().to_owned();
                warn!(correlation_id, operation, "request deadline elapsed");
                entry.resolve(Err(AppError::RequestTimeout(format!(
                    "{operation} after {}ms",
                    self.config.timeouts.request_ms
                ))));
            }
            TimerEvent::ReconnectDue { epoch } => {
                if epoch != self.reconnect_epoch {
                    debug!("stale reconnect wakeup, ignoring");
                    return;
                }
                if self.is_connected() {
                    return;
                }
                info!(
                    attempt = self.budget.attempts(),
                    "attempting scheduled reconnection"
                );
                if self.establish_connection().await.is_err() {
                    self.register_connection_failure();
                }
            }
        }
    }

    fn arm_request_deadline(&self, correlation_id: String) {
        let timeout = self.config.request_timeout();
        let timer_tx = self.timer_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    let _ = timer_tx
                        .send(TimerEvent::RequestDeadline { correlation_id })
                        .await;
                }
            }
        });
    }

    async fn handle_process_exit(&mut self, status: std::io::Result<std::process::ExitStatus>) {
        let reason = match status {
            Ok(status) => status.code().map_or_else(
                || "process terminated by signal".to_owned(),
                |code| format!("process exited with code {code}"),
            ),
            Err(err) => format!("wait error: {err}"),
        };
        self.handle_connection_loss(&reason).await;
    }

    // ── Shared helpers ───────────────────────────────────────────────────────

    fn is_connected(&self) -> bool {
        self.conn.is_some() && *self.state_tx.borrow() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Deliver a lifecycle event without blocking the loop; a slow or absent
    /// observer loses events rather than stalling the transport.
    fn emit(&self, event: ClientEvent) {
        if let Err(err) = self.event_tx.try_send(event) {
            debug!(%err, "lifecycle event dropped");
        }
    }

    /// Final teardown when the facade goes away entirely.
    async fn shutdown(&mut self) {
        self.reconnect_epoch += 1;
        if let Some(conn) = self.conn.take() {
            self.teardown(conn).await;
        }
        self.set_state(ConnectionState::Disconnected);
        self.pending
            .reject_all(|_| AppError::Disconnected("client shut down".to_owned()));
        debug!("session supervisor stopped");
    }
}

/// Await the current connection's transport events; pends forever while no
/// connection is live so the select arm stays quiet.
async fn recv_transport(
    transport_rx: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match transport_rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Await child exit; pends forever while no child is live.
async fn wait_child(
    conn: &mut Option<ActiveConnection>,
) -> std::io::Result<std::process::ExitStatus> {
    match conn.as_mut() {
        Some(active) => active.child.wait().await,
        None => std::future::pending().await,
    }
}
