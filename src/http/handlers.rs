//! HTTP handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use super::api::{HealthResponse, NotFoundResponse, ServerInfo};
use crate::bridge::Bridge;
use crate::config::AuthConfig;
use crate::rpc::{error_codes, error_response, BridgeError};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub auth: Arc<AuthConfig>,
    /// Name reported by the health and info endpoints.
    pub service_name: Arc<str>,
}

impl AppState {
    #[must_use]
    pub fn new(bridge: Arc<Bridge>, auth: AuthConfig, service_name: &str) -> Self {
        Self {
            bridge,
            auth: Arc::new(auth),
            service_name: Arc::from(service_name),
        }
    }
}

/// GET /health - 200 while the child is running, 503 otherwise.
pub async fn get_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let supervisor = state.bridge.supervisor();
    let response = HealthResponse::new(
        state.service_name.as_ref(),
        supervisor.state(),
        supervisor.restart_count(),
    );

    let status = if response.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// GET / and GET /mcp - describe the server.
pub async fn get_info(State(state): State<AppState>) -> Json<ServerInfo> {
    Json(ServerInfo::new(
        state.service_name.as_ref(),
        state.bridge.is_healthy(),
    ))
}

/// POST / and POST /mcp - forward a JSON-RPC request to the child.
pub async fn post_rpc(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(serde_json::Map::new())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting unparseable request body");
                let body = error_response(
                    Value::Null,
                    error_codes::PARSE_ERROR,
                    "Parse error",
                    Some(Value::String(e.to_string())),
                );
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
        }
    };

    match state.bridge.dispatch(payload).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            if !matches!(e.error, BridgeError::InvalidRequest { .. }) {
                tracing::warn!(id = ?e.id, error = %e, "Request failed");
            }
            (status_for(&e.error), Json(e.to_response())).into_response()
        }
    }
}

/// OPTIONS on any route - empty 200.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Fallback for unknown routes. OPTIONS still gets 200.
pub async fn not_found(method: Method) -> Response {
    if method == Method::OPTIONS {
        return preflight().await.into_response();
    }
    (StatusCode::NOT_FOUND, Json(NotFoundResponse::default())).into_response()
}

/// HTTP status for a failed dispatch.
#[must_use]
pub fn status_for(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        BridgeError::ProcessUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
