//! Request Correlator
//!
//! Matches `res` frames to the requests that caused them. Every entry is
//! settled exactly once: by its response, by its deadline, or by a flush
//! when the transport closes. All table operations run under one lock, and
//! the settling side sends its result while still holding it, so a timeout
//! that loses the race always finds the result already delivered.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::error::{LinkError, LinkResult};

/// An outstanding request
struct PendingRequest {
    method: String,
    deadline: Instant,
    reply: oneshot::Sender<LinkResult<Value>>,
}

/// Caller side of a registered request
#[derive(Debug)]
pub struct PendingHandle {
    pub id: String,
    pub method: String,
    deadline: Instant,
    rx: oneshot::Receiver<LinkResult<Value>>,
}

/// Table of in-flight requests keyed by id
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, PendingRequest>>,
    counter: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Process-unique id: monotonic counter plus wall-clock millis
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", n, chrono::Utc::now().timestamp_millis())
    }

    /// Create a pending entry that expires after `timeout`
    pub fn register(&self, method: &str, timeout: Duration) -> PendingHandle {
        let id = self.next_id();
        let deadline = Instant::now() + timeout;
        let (reply, rx) = oneshot::channel();

        self.table().insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                deadline,
                reply,
            },
        );

        tracing::trace!(request_id = %id, method = %method, "Registered pending request");

        PendingHandle {
            id,
            method: method.to_string(),
            deadline,
            rx,
        }
    }

    /// Settle `id` with `result`
    ///
    /// Returns false when the id is unknown (already settled or never ours).
    pub fn resolve(&self, id: &str, result: LinkResult<Value>) -> bool {
        let mut table = self.table();
        match table.remove(id) {
            Some(entry) => {
                let _ = entry.reply.send(result);
                true
            }
            None => false,
        }
    }

    /// Drop an entry without settling it; returns its method if it was still pending
    pub fn take(&self, id: &str) -> Option<String> {
        self.table().remove(id).map(|entry| entry.method)
    }

    /// Reject every outstanding request at once
    pub fn reject_all(&self, error: LinkError) -> usize {
        let mut table = self.table();
        let count = table.len();
        let now = Instant::now();
        for (id, entry) in table.drain() {
            tracing::debug!(
                request_id = %id,
                method = %entry.method,
                remaining_ms = entry.deadline.saturating_duration_since(now).as_millis() as u64,
                error = %error,
                "Rejecting pending request"
            );
            let _ = entry.reply.send(Err(error.clone()));
        }
        count
    }

    /// Number of requests still waiting
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Suspend until the request settles or its deadline passes
    pub async fn wait(&self, handle: PendingHandle) -> LinkResult<Value> {
        let PendingHandle {
            id,
            method,
            deadline,
            mut rx,
        } = handle;

        // Removes the entry if the caller stops waiting early
        let _guard = EntryGuard {
            correlator: self,
            id: &id,
        };

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::TransportClosed),
            Err(_) => {
                if self.take(&id).is_some() {
                    tracing::warn!(request_id = %id, method = %method, "Gateway request timed out");
                    Err(LinkError::RequestTimeout { method })
                } else {
                    // Settled between the deadline firing and the removal
                    rx.try_recv().unwrap_or(Err(LinkError::TransportClosed))
                }
            }
        }
    }
}

struct EntryGuard<'a> {
    correlator: &'a Correlator,
    id: &'a str,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.correlator.take(self.id);
    }
}
