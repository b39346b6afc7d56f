//! Per-connection reader tasks.
//!
//! [`run_reader`] drives a [`FramedRead`] over the tool server's stdout and
//! forwards each complete line into the session supervisor as a
//! [`TransportEvent::LineReceived`]. Envelope decoding happens on the
//! supervisor task, which owns the pending-request table; the reader only
//! frames.
//!
//! Oversize-line errors from the codec affect that line alone — the reader
//! logs and keeps going. I/O errors and EOF end the stream and are reported
//! once as [`TransportEvent::StreamClosed`].
//!
//! [`run_stderr_logger`] drains the child's stderr and logs each line, so
//! tool-server diagnostics land in the host's structured log rather than
//! vanishing into a closed pipe.

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::codec::LineCodec;
use crate::transport::TransportEvent;
use crate::AppError;

/// Read framed lines from `stdout` and forward them as transport events.
///
/// Runs until EOF, an unrecoverable I/O error, cancellation, or the event
/// channel closing. On EOF or I/O error a single
/// [`TransportEvent::StreamClosed`] is emitted before returning; on
/// cancellation the task exits silently (the supervisor initiated teardown
/// and needs no notification).
pub async fn run_reader<R>(
    stdout: R,
    event_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("reader: cancellation received, stopping");
                return;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("reader: EOF on tool server stdout");
                        send_closed(&event_tx, "stream closed").await;
                        return;
                    }

                    Some(Err(AppError::Protocol(msg))) => {
                        // Oversize line — drop it, keep the stream alive.
                        warn!(error = %msg, "reader: framing error, line dropped");
                    }

                    Some(Err(err)) => {
                        warn!(%err, "reader: stream error, stopping");
                        send_closed(&event_tx, &format!("stream error: {err}")).await;
                        return;
                    }

                    Some(Ok(line)) => {
                        if event_tx.send(TransportEvent::LineReceived(line)).await.is_err() {
                            debug!("reader: event channel closed, stopping");
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Drain the tool server's stderr, logging each line at warn level.
///
/// Exits on EOF, read error, or cancellation. Nothing is forwarded to the
/// supervisor — stderr is diagnostic only and never carries envelopes.
pub async fn run_stderr_logger<R>(stderr: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(stderr).lines();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return,

            next = lines.next_line() => {
                match next {
                    Ok(Some(line)) => {
                        let trimmed = line.trim_end();
                        if !trimmed.is_empty() {
                            warn!(target: "toolbridge::server_stderr", "{trimmed}");
                        }
                    }
                    Ok(None) => return,
                    Err(err) => {
                        debug!(%err, "stderr logger: read error, stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Emit [`TransportEvent::StreamClosed`], logging when the channel is gone.
async fn send_closed(event_tx: &mpsc::Sender<TransportEvent>, reason: &str) {
    let event = TransportEvent::StreamClosed {
        reason: reason.to_owned(),
    };
    if event_tx.send(event).await.is_err() {
        debug!("reader: event channel closed before StreamClosed could be delivered");
    }
}
