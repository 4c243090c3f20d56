//! Caller authentication middleware.

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use super::handlers::AppState;
use crate::rpc::{error_codes, error_response};

/// Reject requests whose credentials header does not match the configured
/// token. Passes everything through when authentication is disabled, and
/// OPTIONS always.
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let credentials = request
        .headers()
        .get(state.auth.header_name.as_str())
        .and_then(|value| value.to_str().ok());

    if state.auth.authorize(credentials) {
        return next.run(request).await;
    }

    tracing::warn!(
        path = %request.uri().path(),
        header = %state.auth.header_name,
        "Rejected unauthenticated request"
    );
    let body = error_response(
        Value::Null,
        error_codes::INVALID_REQUEST,
        "Authentication required",
        None,
    );
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
