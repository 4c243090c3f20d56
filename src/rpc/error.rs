//! Bridge error taxonomy.

use std::time::Duration;

use serde_json::Value;

use super::types::{error_codes, RequestId};

/// Errors that can occur while correlating a request with its response.
///
/// The type is `Clone` so that one failure (a child exit, for example) can
/// settle every pending entry at once.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The inbound envelope is not a usable JSON-RPC 2.0 request.
    #[error("Invalid Request - {reason}")]
    InvalidRequest {
        /// Identifier echoed back to the caller, `Value::Null` if unknown.
        id: Value,
        /// What was wrong with the envelope.
        reason: String,
    },

    /// The identifier already has a pending entry.
    #[error("Duplicate request id {0}")]
    DuplicateIdentifier(RequestId),

    /// No response arrived within the window.
    #[error("Request timeout after {}ms", .0.as_millis())]
    RequestTimeout(Duration),

    /// There is no healthy child process to talk to.
    #[error("Child process not available")]
    ProcessUnavailable,

    /// The child process went away while the request was pending.
    #[error("Child process exited: {0}")]
    ChildExited(String),

    /// Writing the request to the child's stdin failed.
    #[error("Failed to write to child process: {0}")]
    WriteFailed(String),

    /// A line from the child could not be parsed. Never returned to callers.
    #[error("Malformed upstream message: {0}")]
    MalformedUpstreamMessage(String),
}

impl BridgeError {
    /// JSON-RPC error code reported to the caller.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidRequest { .. } => error_codes::INVALID_REQUEST,
            Self::ProcessUnavailable => error_codes::SERVER_UNAVAILABLE,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Build the JSON-RPC error response for this failure.
    ///
    /// `id` is the identifier of the request that failed, if one was known.
    #[must_use]
    pub fn to_response(&self, id: Option<&RequestId>) -> Value {
        match self {
            Self::InvalidRequest { id, .. } => {
                super::types::error_response(id.clone(), self.code(), &self.to_string(), None)
            }
            Self::ProcessUnavailable => super::types::error_response(
                id.map_or(Value::Null, RequestId::to_value),
                self.code(),
                &self.to_string(),
                None,
            ),
            _ => super::types::error_response(
                id.map_or(Value::Null, RequestId::to_value),
                self.code(),
                "Internal error",
                Some(Value::String(self.to_string())),
            ),
        }
    }
}
