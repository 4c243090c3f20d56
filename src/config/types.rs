//! Configuration types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::process::RestartPolicy;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Largest accepted request body: 16 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Default header carrying credentials.
pub const DEFAULT_AUTH_HEADER: &str = "Authorization";

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub child: ChildConfig,
    pub rpc: RpcConfig,
    pub restart: RestartConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Name reported by the health endpoint.
    pub service_name: String,
    /// Allow any origin on every endpoint.
    pub cors_permissive: bool,
    /// Bodies larger than this are rejected with 413.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            service_name: "stdio-bridge".to_string(),
            cors_permissive: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How callers prove their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    /// Header value must equal the token.
    #[serde(rename = "header")]
    Header,
    /// Header value must be `Bearer <token>` or the bare token.
    #[serde(rename = "oauth2bearer")]
    OAuth2Bearer,
}

impl AuthMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::OAuth2Bearer => "oauth2bearer",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "header" => Ok(Self::Header),
            "oauth2bearer" => Ok(Self::OAuth2Bearer),
            other => Err(format!(
                "unknown auth mode '{other}' (expected 'header' or 'oauth2bearer')"
            )),
        }
    }
}

/// Optional caller authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: Option<AuthMode>,
    pub token: Option<String>,
    /// Header inspected for credentials.
    pub header_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: None,
            token: None,
            header_name: DEFAULT_AUTH_HEADER.to_string(),
        }
    }
}

impl AuthConfig {
    /// Authentication is enforced only when both mode and token are set.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.mode.is_some() && self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Check the value of the credentials header.
    #[must_use]
    pub fn authorize(&self, header_value: Option<&str>) -> bool {
        let (Some(mode), Some(token)) = (self.mode, self.token.as_deref()) else {
            return true;
        };
        if token.is_empty() {
            return true;
        }
        let Some(value) = header_value else {
            return false;
        };

        match mode {
            AuthMode::Header => value == token,
            AuthMode::OAuth2Bearer => {
                value == token || value.strip_prefix("Bearer ").is_some_and(|v| v == token)
            }
        }
    }
}

/// The child process to supervise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Pass the auth settings to the child as `--auth-*` flags.
    pub forward_auth: bool,
    pub working_dir: Option<PathBuf>,
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            program: "npx".to_string(),
            args: vec!["-y".to_string(), "@shopify/dev-mcp@latest".to_string()],
            env: BTreeMap::from([("NPM_CONFIG_CACHE".to_string(), "/tmp/.npm".to_string())]),
            forward_auth: true,
            working_dir: None,
        }
    }
}

/// Correlation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub request_timeout_ms: u64,
    pub max_line_bytes: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            max_line_bytes: crate::rpc::DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl RpcConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Restart behaviour after an unexpected exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub delay_ms: u64,
    /// Zero means unlimited.
    pub max_attempts: u32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            delay_ms: 5_000,
            max_attempts: 0,
        }
    }
}

impl RestartConfig {
    #[must_use]
    pub fn policy(&self) -> RestartPolicy {
        RestartPolicy {
            delay: Duration::from_millis(self.delay_ms),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
        }
    }
}
