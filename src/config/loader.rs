//! Configuration file loader.

use std::path::{Path, PathBuf};

use super::{AuthMode, BridgeConfig};

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .stdio-bridge.toml
        search_paths.push(PathBuf::from(".stdio-bridge.toml"));

        // 2. User config directory: ~/.config/stdio-bridge/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("stdio-bridge").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(&self) -> Result<BridgeConfig, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config file");
                return Self::load_from_path(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(BridgeConfig::default())
    }

    /// Load configuration from a specific path.
    fn load_from_path(path: &Path) -> Result<BridgeConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the first config file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `PORT`, `AUTH_TYPE`, `AUTH_TOKEN` and `AUTH_HEADER_NAME` overrides.
///
/// `lookup` resolves a variable name; pass `|key| std::env::var(key).ok()`
/// for the process environment.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if `PORT` or `AUTH_TYPE` cannot be
/// parsed.
pub fn apply_env_overrides<F>(config: &mut BridgeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
            key: "PORT".to_string(),
            reason: format!("'{port}' is not a valid port"),
        })?;
    }

    if let Some(mode) = lookup("AUTH_TYPE").filter(|v| !v.is_empty()) {
        config.auth.mode = Some(mode.parse::<AuthMode>().map_err(|reason| {
            ConfigError::InvalidValue {
                key: "AUTH_TYPE".to_string(),
                reason,
            }
        })?);
    }

    if let Some(token) = lookup("AUTH_TOKEN").filter(|v| !v.is_empty()) {
        config.auth.token = Some(token);
    }

    if let Some(header) = lookup("AUTH_HEADER_NAME").filter(|v| !v.is_empty()) {
        config.auth.header_name = header;
    }

    Ok(())
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}
