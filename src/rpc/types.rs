//! JSON-RPC 2.0 envelope handling.
//!
//! The bridge is agnostic to method semantics. It only looks at the
//! `jsonrpc` marker and the `id` used for correlation; everything else is
//! forwarded to the child untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::BridgeError;

/// JSON-RPC protocol version accepted by the bridge.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes used by the bridge.
pub mod error_codes {
    /// Body was not valid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// Envelope was not a valid request (also used for failed authentication).
    pub const INVALID_REQUEST: i64 = -32600;
    /// Failure inside the bridge or the child.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The child process is not available.
    pub const SERVER_UNAVAILABLE: i64 = -32000;
}

/// Correlation key of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Interpret a JSON value as an identifier.
    ///
    /// Returns `None` for anything other than an integer or a string.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// A validated inbound request, ready to be forwarded.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    body: Map<String, Value>,
    id: Option<RequestId>,
}

impl Envelope {
    /// Validate a raw payload.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::InvalidRequest` if the payload is not an
    /// object, lacks `"jsonrpc": "2.0"`, or carries an id that is neither
    /// an integer nor a string. An explicit `"id": null` counts as absent.
    pub fn parse(payload: Value) -> Result<Self, BridgeError> {
        let Value::Object(body) = payload else {
            return Err(BridgeError::InvalidRequest {
                id: Value::Null,
                reason: "request must be a JSON object".to_string(),
            });
        };

        let raw_id = body.get("id").cloned().unwrap_or(Value::Null);

        if body.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(BridgeError::InvalidRequest {
                id: raw_id,
                reason: "missing or invalid jsonrpc field".to_string(),
            });
        }

        let id = match &raw_id {
            Value::Null => None,
            other => Some(RequestId::from_value(other).ok_or_else(|| {
                BridgeError::InvalidRequest {
                    id: Value::Null,
                    reason: "id must be a string or an integer".to_string(),
                }
            })?),
        };

        Ok(Self { body, id })
    }

    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    /// Method name, if the envelope carries one.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.body.get("method").and_then(Value::as_str)
    }

    /// Set the correlation id, overwriting the `id` member of the body.
    pub fn assign_id(&mut self, id: RequestId) {
        self.body.insert("id".to_string(), id.to_value());
        self.id = Some(id);
    }

    /// Serialize as one newline-terminated line.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::WriteFailed` if serialization fails.
    pub fn to_line(&self) -> Result<Vec<u8>, BridgeError> {
        let mut line =
            serde_json::to_vec(&self.body).map_err(|e| BridgeError::WriteFailed(e.to_string()))?;
        line.push(b'\n');
        Ok(line)
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

/// Extract the correlation id of a message read from the child.
#[must_use]
pub fn response_id(message: &Value) -> Option<RequestId> {
    message.get("id").and_then(RequestId::from_value)
}

/// Build a JSON-RPC error response.
#[must_use]
pub fn error_response(id: Value, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = Map::new();
    error.insert("code".to_string(), Value::from(code));
    error.insert("message".to_string(), Value::String(message.to_string()));
    if let Some(data) = data {
        error.insert("data".to_string(), data);
    }

    let mut response = Map::new();
    response.insert(
        "jsonrpc".to_string(),
        Value::String(JSONRPC_VERSION.to_string()),
    );
    response.insert("error".to_string(), Value::Object(error));
    response.insert("id".to_string(), id);
    Value::Object(response)
}
