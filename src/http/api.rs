//! Response bodies for the HTTP endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::process::ProcessState;

/// Response for GET /health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`.
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Configured service name.
    pub service: String,
    /// Lifecycle state of the child process.
    pub process: ProcessState,
    /// Automatic restarts since startup.
    pub restarts: u32,
}

impl HealthResponse {
    #[must_use]
    pub fn new(service: impl Into<String>, process: ProcessState, restarts: u32) -> Self {
        Self {
            status: health_label(process.is_healthy()).to_string(),
            timestamp: Utc::now(),
            service: service.into(),
            process,
            restarts,
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.process.is_healthy()
    }
}

/// Response for GET / and GET /mcp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub transport: String,
    pub protocols: Vec<String>,
    pub status: String,
}

impl ServerInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, healthy: bool) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: env!("CARGO_PKG_DESCRIPTION").to_string(),
            transport: "http".to_string(),
            protocols: vec!["mcp".to_string()],
            status: health_label(healthy).to_string(),
        }
    }
}

/// Body for unknown routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotFoundResponse {
    pub error: String,
}

impl Default for NotFoundResponse {
    fn default() -> Self {
        Self {
            error: "Not found".to_string(),
        }
    }
}

fn health_label(healthy: bool) -> &'static str {
    if healthy {
        "healthy"
    } else {
        "unhealthy"
    }
}
