//! Connection readiness handshake.
//!
//! A freshly spawned tool server is not necessarily ready to serve: runtime
//! startup, module loading, and tool registration all happen after exec. The
//! handshake distinguishes "process started" from "process ready" by sending
//! a capability-discovery probe (`tools/list`) with the reserved
//! [`PROBE_ID`] correlation id and reading raw lines until the matching
//! response arrives or the deadline elapses.
//!
//! Matching is strict: the line must decode as JSON, echo the sentinel id,
//! and carry a `result` member. An `error` member under the sentinel id
//! fails the handshake immediately. The probe is never registered in the
//! pending-request table — it exists before the reader task starts.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::process::ChildStdin;
use tracing::{debug, info};

use crate::transport::envelope::{self, PROBE_ID};
use crate::transport::write_line;
use crate::{AppError, Result};

/// Send the capability-discovery probe to the tool server's stdin.
///
/// # Errors
///
/// Returns [`AppError::Handshake`] if the write fails.
pub async fn send_probe(stdin: &mut ChildStdin) -> Result<()> {
    let probe = envelope::discovery_request();
    write_line(stdin, &probe)
        .await
        .map_err(|err| AppError::Handshake(format!("failed to send readiness probe: {err}")))?;
    debug!(probe_id = PROBE_ID, "handshake: readiness probe sent");
    Ok(())
}

/// Wait for the probe response on the tool server's stdout.
///
/// Reads lines one at a time under a shared deadline. Lines that are not the
/// probe response — notifications, other traffic, non-JSON noise — are
/// logged at debug level and skipped.
///
/// # Errors
///
/// - [`AppError::Handshake`]`("probe timeout …")` — deadline elapsed.
/// - [`AppError::Handshake`]`("tool server exited during handshake")` — EOF.
/// - [`AppError::Handshake`]`("probe rejected: …")` — error envelope under
///   the sentinel id.
/// - [`AppError::Handshake`]`("probe io error: …")` — underlying read failed.
pub async fn wait_for_ready<R>(stdout: &mut R, timeout: Duration) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(probe_timeout(timeout));
        }

        let mut line = String::new();
        let n = tokio::time::timeout(remaining, stdout.read_line(&mut line))
            .await
            .map_err(|_| probe_timeout(timeout))?
            .map_err(|err| AppError::Handshake(format!("probe io error: {err}")))?;

        if n == 0 {
            return Err(AppError::Handshake(
                "tool server exited during handshake".into(),
            ));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Ok(decoded) = envelope::decode_line(trimmed) else {
            debug!(raw = trimmed, "handshake: non-envelope line, skipping");
            continue;
        };

        if decoded.correlation_id().as_deref() != Some(PROBE_ID) {
            debug!("handshake: unrelated envelope before probe response, skipping");
            continue;
        }

        if let Some(error) = decoded.error {
            return Err(AppError::Handshake(format!(
                "probe rejected: {}",
                error.describe()
            )));
        }

        if decoded.result.is_some() {
            info!("handshake: tool server ready");
            return Ok(());
        }

        debug!("handshake: probe id echoed without result or error, skipping");
    }
}

fn probe_timeout(timeout: Duration) -> AppError {
    AppError::Handshake(format!(
        "probe timeout: no readiness response within {timeout:?}"
    ))
}
