//! Pending request table.
//!
//! Every request forwarded to the child is registered here under its id.
//! The entry is settled exactly once, by whichever comes first: a matching
//! response, the per-request timeout, or a child exit. Later attempts to
//! settle the same entry are no-ops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use super::{BridgeError, RequestId};

/// How long a request may stay pending before it fails.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Outcome = Result<Value, BridgeError>;

#[derive(Debug)]
struct PendingEntry {
    serial: u64,
    tx: oneshot::Sender<Outcome>,
    created_at: Instant,
}

/// Maps outstanding request ids to their completion handles.
#[derive(Debug)]
pub struct Correlator {
    pending: Mutex<HashMap<RequestId, PendingEntry>>,
    timeout: Duration,
    next_serial: AtomicU64,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl Correlator {
    /// Create a correlator whose entries time out after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
            next_serial: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn table(&self) -> MutexGuard<'_, HashMap<RequestId, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending entry for `id`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::DuplicateIdentifier` if `id` is already pending.
    pub fn register(self: &Arc<Self>, id: RequestId) -> Result<PendingResponse, BridgeError> {
        let mut table = self.table();
        if table.contains_key(&id) {
            return Err(BridgeError::DuplicateIdentifier(id));
        }

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        table.insert(
            id.clone(),
            PendingEntry {
                serial,
                tx,
                created_at: Instant::now(),
            },
        );
        drop(table);

        tracing::trace!(id = %id, "Registered pending request");

        Ok(PendingResponse {
            id,
            serial,
            deadline: tokio::time::Instant::now() + self.timeout,
            rx,
            correlator: Arc::clone(self),
        })
    }

    /// Settle the entry for `id` with a response.
    ///
    /// Returns `false`, and drops the response, if nothing is pending
    /// under `id`.
    pub fn resolve(&self, id: &RequestId, value: Value) -> bool {
        let settled = self.settle(id, Ok(value));
        if !settled {
            tracing::debug!(id = %id, "Dropping response with no pending request");
        }
        settled
    }

    /// Settle the entry for `id` with a failure.
    pub fn reject(&self, id: &RequestId, err: BridgeError) -> bool {
        self.settle(id, Err(err))
    }

    /// Fail every pending entry with `err` and empty the table.
    ///
    /// Returns the number of entries settled.
    pub fn reject_all(&self, err: &BridgeError) -> usize {
        let drained: Vec<_> = self.table().drain().collect();
        let count = drained.len();

        for (id, entry) in drained {
            tracing::debug!(id = %id, error = %err, "Rejecting pending request");
            let _ = entry.tx.send(Err(err.clone()));
        }

        if count > 0 {
            tracing::info!(count, error = %err, "Rejected all pending requests");
        }
        count
    }

    /// Number of entries currently pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    #[must_use]
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.table().contains_key(id)
    }

    /// Remove and settle an entry. The send happens under the lock so a
    /// waiter that lost the race always finds the winning outcome.
    fn settle(&self, id: &RequestId, outcome: Outcome) -> bool {
        let mut table = self.table();
        let Some(entry) = table.remove(id) else {
            return false;
        };

        tracing::debug!(
            id = %id,
            ok = outcome.is_ok(),
            elapsed_ms = u64::try_from(entry.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Settled pending request"
        );
        let _ = entry.tx.send(outcome);
        true
    }

    /// Drop an entry without settling it, only if it is still the one
    /// registered under `serial`.
    fn unregister(&self, id: &RequestId, serial: u64) {
        let mut table = self.table();
        if table.get(id).is_some_and(|entry| entry.serial == serial) {
            table.remove(id);
            tracing::trace!(id = %id, "Unregistered pending request");
        }
    }
}

/// Completion handle returned by [`Correlator::register`].
///
/// The timeout window starts at registration, not when [`wait`] is first
/// polled. Dropping the handle unregisters its entry if it is still pending.
///
/// [`wait`]: PendingResponse::wait
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    serial: u64,
    deadline: tokio::time::Instant,
    rx: oneshot::Receiver<Outcome>,
    correlator: Arc<Correlator>,
}

impl PendingResponse {
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// When the entry times out.
    #[must_use]
    pub fn deadline(&self) -> tokio::time::Instant {
        self.deadline
    }

    /// Wait for the entry to settle.
    ///
    /// # Errors
    ///
    /// Returns the failure the entry was settled with: `RequestTimeout` if
    /// the deadline passed first, `ChildExited` if the child went away.
    pub async fn wait(mut self) -> Result<Value, BridgeError> {
        let timeout = self.correlator.timeout;

        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BridgeError::ProcessUnavailable),
            Err(_) => {
                if self
                    .correlator
                    .reject(&self.id, BridgeError::RequestTimeout(timeout))
                {
                    tracing::warn!(
                        id = %self.id,
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "Request timed out"
                    );
                }
                // Whoever settled first has already sent.
                self.rx
                    .try_recv()
                    .unwrap_or(Err(BridgeError::ProcessUnavailable))
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.correlator.unregister(&self.id, self.serial);
    }
}
