//! Pending-request table.
//!
//! Maps correlation ids to the callers still awaiting a response. The table
//! is owned exclusively by the session supervisor task, which is the only
//! code that inserts, completes, or evicts entries — no lock is needed even
//! though callers on other tasks suspend on the entry's oneshot receiver.
//!
//! Every entry is completed exactly once: `complete`, `evict`, and
//! `reject_all` all remove the entry before resolving it, and the consuming
//! [`PendingRequest::resolve`] makes double-completion unrepresentable.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{AppError, Result};

/// One in-flight request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
    tx: oneshot::Sender<Result<Value>>,
    operation: String,
    submitted_at: Instant,
}

impl PendingRequest {
    /// Domain operation name, used in timeout and log messages.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// When the request was written to the wire.
    #[must_use]
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Deliver the outcome to the waiting caller, consuming the entry.
    ///
    /// A caller that stopped waiting (dropped its receiver) is not an error;
    /// the outcome is discarded with a debug log.
    pub fn resolve(self, outcome: Result<Value>) {
        if self.tx.send(outcome).is_err() {
            debug!(
                operation = %self.operation,
                "pending request resolved after caller stopped waiting"
            );
        }
    }
}

/// Correlation id → pending request, owned by the session supervisor.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<String, PendingRequest>,
}

impl PendingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request under a fresh correlation id.
    ///
    /// Correlation ids are UUID v4 strings generated per request, so a
    /// collision with a live entry does not occur; if one ever did, the old
    /// entry would be dropped unresolved, which the exactly-once invariant
    /// forbids — hence ids must never be reused while pending.
    pub fn insert(&mut self, correlation_id: String, operation: String, tx: oneshot::Sender<Result<Value>>) {
        self.entries.insert(
            correlation_id,
            PendingRequest {
                tx,
                operation,
                submitted_at: Instant::now(),
            },
        );
    }

    /// Complete the entry for `correlation_id` with `outcome`.
    ///
    /// Returns `false` when the id is unknown — a notification, a duplicate
    /// response, or a response to an already-timed-out request. The caller
    /// logs and ignores those.
    pub fn complete(&mut self, correlation_id: &str, outcome: Result<Value>) -> bool {
        match self.entries.remove(correlation_id) {
            Some(entry) => {
                entry.resolve(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove and return the entry for `correlation_id` without resolving it.
    ///
    /// Used by timeout eviction, where the caller constructs the rejection
    /// from the entry's operation name.
    pub fn evict(&mut self, correlation_id: &str) -> Option<PendingRequest> {
        self.entries.remove(correlation_id)
    }

    /// Reject every pending request, draining the table.
    ///
    /// `make_err` receives each entry's operation name so the rejection can
    /// reference it.
    pub fn reject_all<F>(&mut self, mut make_err: F)
    where
        F: FnMut(&str) -> AppError,
    {
        for (_, entry) in self.entries.drain() {
            let err = make_err(&entry.operation);
            entry.resolve(Err(err));
        }
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no requests are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
