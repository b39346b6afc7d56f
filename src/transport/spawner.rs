//! Tool-server process spawner.
//!
//! Spawns the tool server as a child process with:
//! - all three standard streams piped (stdout and stderr both get listeners),
//! - `kill_on_drop(true)` so an abandoned handle cannot orphan the process,
//! - `env_clear()` + a safe variable allowlist, with [`SERVER_MODE_ENV`]
//!   injected so the child starts in stdio server mode,
//! - graceful termination: SIGTERM first, bounded wait, kill as fallback.

use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::{AppError, Result};

/// Environment variables inherited by the spawned tool server.
///
/// Everything else is stripped via `env_clear()` before launch so host
/// credentials are never visible to the child.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Environment flag telling the child to serve requests over stdio.
pub const SERVER_MODE_ENV: &str = "TOOL_SERVER_MODE";

/// Value assigned to [`SERVER_MODE_ENV`].
pub const SERVER_MODE_STDIO: &str = "stdio";

/// How long [`terminate`] waits after SIGTERM before killing outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Live stdio handles for a freshly spawned tool server.
///
/// The readiness handshake has **not** run yet; callers must probe the
/// process via [`crate::transport::handshake`] before treating it as
/// connected.
#[derive(Debug)]
pub struct ServerProcess {
    /// Child handle — kept alive so `kill_on_drop` works.
    pub child: Child,
    /// Request stream (client → server).
    pub stdin: ChildStdin,
    /// Response stream (server → client).
    pub stdout: ChildStdout,
    /// Diagnostic stream, logged line-by-line by the session layer.
    pub stderr: ChildStderr,
}

/// Spawn the tool-server process with piped stdio.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn tool server: …")` — OS spawn failure.
/// - `AppError::Spawn("failed to capture …")` — a piped stream handle was
///   unexpectedly absent.
pub fn spawn_server(config: &BridgeConfig) -> Result<ServerProcess> {
    let mut cmd = Command::new(&config.server_command);

    for arg in &config.server_args {
        cmd.arg(arg);
    }

    // Strip inherited environment, then inject only the safe allowlist.
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.env(SERVER_MODE_ENV, SERVER_MODE_STDIO);

    cmd.stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn tool server: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture tool server stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture tool server stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture tool server stderr".into()))?;

    debug!(
        command = %config.server_command,
        pid = child.id(),
        "tool server spawned"
    );

    Ok(ServerProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Terminate the tool server gracefully.
///
/// On unix a SIGTERM is delivered first and the child is given
/// [`TERMINATE_GRACE`] to exit on its own; only then is it killed. On other
/// platforms the process is killed directly. Termination is best-effort —
/// a process that already exited is not an error.
pub async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            match send_sigterm(pid) {
                Ok(()) => {
                    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                        Ok(Ok(status)) => {
                            debug!(%status, "tool server exited after SIGTERM");
                            return;
                        }
                        Ok(Err(err)) => {
                            warn!(%err, "error waiting for tool server after SIGTERM");
                        }
                        Err(_elapsed) => {
                            warn!("tool server ignored SIGTERM, killing");
                        }
                    }
                }
                Err(err) => {
                    debug!(%err, "SIGTERM delivery failed, killing");
                }
            }
        }
    }

    if let Err(err) = child.kill().await {
        debug!(%err, "tool server kill failed (already exited?)");
    }
}

/// Deliver SIGTERM to `pid`.
#[cfg(unix)]
fn send_sigterm(pid: u32) -> std::result::Result<(), String> {
    let raw = i32::try_from(pid).map_err(|err| err.to_string())?;
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), nix::sys::signal::Signal::SIGTERM)
        .map_err(|err| err.to_string())
}
