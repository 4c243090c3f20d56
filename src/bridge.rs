//! Request dispatch from the HTTP side to the child process.
//!
//! [`Bridge::dispatch`] is the only code path that writes to the child.
//! It registers the request with the correlator before writing so a fast
//! response can never arrive ahead of its pending entry.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::process::ProcessSupervisor;
use crate::rpc::{BridgeError, Envelope, PendingResponse, RequestId};

/// A failed dispatch, with the id of the request when one was known.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{error}")]
pub struct DispatchError {
    pub id: Option<RequestId>,
    pub error: BridgeError,
}

impl DispatchError {
    fn new(id: Option<RequestId>, error: BridgeError) -> Self {
        Self { id, error }
    }

    /// JSON-RPC error response for the caller.
    #[must_use]
    pub fn to_response(&self) -> Value {
        self.error.to_response(self.id.as_ref())
    }
}

/// Forwards JSON-RPC requests to the supervised child.
#[derive(Debug)]
pub struct Bridge {
    supervisor: Arc<ProcessSupervisor>,
    /// Next auto-assigned id. Wraps at `i64::MAX`.
    next_id: AtomicI64,
}

impl Bridge {
    #[must_use]
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            supervisor,
            next_id: AtomicI64::new(1),
        }
    }

    #[must_use]
    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.supervisor.is_healthy()
    }

    /// Forward one request and wait for the child's response.
    ///
    /// Requests without an id get the next value of a counter that is never
    /// reset; values pending under a caller-supplied id are skipped. The
    /// timeout window covers queueing the line as well as the response.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` wrapping `InvalidRequest` (nothing is written
    /// to the child), `ProcessUnavailable`, `DuplicateIdentifier`,
    /// `WriteFailed`, `RequestTimeout` or `ChildExited`.
    pub async fn dispatch(&self, payload: Value) -> Result<Value, DispatchError> {
        let mut envelope = Envelope::parse(payload).map_err(|e| DispatchError::new(None, e))?;

        if !self.supervisor.is_healthy() {
            return Err(DispatchError::new(
                envelope.id().cloned(),
                BridgeError::ProcessUnavailable,
            ));
        }

        let pending = match envelope.id().cloned() {
            Some(id) => self
                .supervisor
                .correlator()
                .register(id.clone())
                .map_err(|e| DispatchError::new(Some(id), e))?,
            None => {
                let pending = self.register_fresh()?;
                envelope.assign_id(pending.id().clone());
                pending
            }
        };
        let id = pending.id().clone();

        let line = envelope
            .to_line()
            .map_err(|e| DispatchError::new(Some(id.clone()), e))?;

        tracing::debug!(
            id = %id,
            method = envelope.method().unwrap_or("<none>"),
            "Forwarding request to child"
        );

        // Dropping `pending` on failure unregisters it.
        let send = self.supervisor.send(id.clone(), line);
        match tokio::time::timeout_at(pending.deadline(), send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(id = %id, error = %e, "Failed to forward request");
                return Err(DispatchError::new(Some(id), e));
            }
            Err(_) => tracing::warn!(id = %id, "Child input queue full, request not forwarded"),
        }

        pending
            .wait()
            .await
            .map_err(|e| DispatchError::new(Some(id), e))
    }

    fn register_fresh(&self) -> Result<PendingResponse, DispatchError> {
        loop {
            let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
            match self.supervisor.correlator().register(id.clone()) {
                Ok(pending) => return Ok(pending),
                Err(BridgeError::DuplicateIdentifier(_)) => {
                    tracing::debug!(id = %id, "Skipping id already in use");
                }
                Err(e) => return Err(DispatchError::new(Some(id), e)),
            }
        }
    }
}
