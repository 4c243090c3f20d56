//! Child process command line.
//!
//! [`ChildCommand`] describes what to spawn: program, arguments, an
//! environment overlay, and optionally the bridge's auth settings forwarded
//! as flags. All three standard streams are piped; stdout carries the
//! protocol, stderr is only surfaced in the logs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::{AuthConfig, ChildConfig, DEFAULT_AUTH_HEADER};

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Child binary not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied spawning {0}")]
    PermissionDenied(String),
    /// A child instance is already being supervised.
    #[error("Child process already running")]
    AlreadyRunning,
    /// `stop` was called before the child came up.
    #[error("Supervisor stopped before the child started")]
    Cancelled,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Auth flags forwarded to the child.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AuthFlags {
    mode: String,
    token: String,
    header_name: Option<String>,
}

/// Builder for the supervised child's command line.
#[derive(Debug, Clone, Default)]
pub struct ChildCommand {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    auth: Option<AuthFlags>,
}

impl ChildCommand {
    /// Create a command for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Build the command described by the `[child]` config section.
    ///
    /// Auth flags are only added when `forward_auth` is set and `auth` is
    /// enabled.
    #[must_use]
    pub fn from_config(child: &ChildConfig, auth: &AuthConfig) -> Self {
        let mut command = Self::new(child.program.clone())
            .args(child.args.iter().cloned())
            .envs(child.env.clone());

        if let Some(dir) = &child.working_dir {
            command = command.working_dir(dir.clone());
        }

        if child.forward_auth {
            command = command.forward_auth(auth);
        }

        command
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one variable on top of the inherited environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set several variables on top of the inherited environment.
    #[must_use]
    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Set the working directory for the child.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Pass `--auth-type`, `--auth-token` and, for a non-default header,
    /// `--auth-header` to the child. No-op when `auth` is disabled.
    #[must_use]
    pub fn forward_auth(mut self, auth: &AuthConfig) -> Self {
        if let (true, Some(mode), Some(token)) = (auth.is_enabled(), auth.mode, &auth.token) {
            self.auth = Some(AuthFlags {
                mode: mode.as_str().to_string(),
                token: token.clone(),
                header_name: (auth.header_name != DEFAULT_AUTH_HEADER)
                    .then(|| auth.header_name.clone()),
            });
        }
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = self.args.clone();

        if let Some(auth) = &self.auth {
            args.push("--auth-type".to_string());
            args.push(auth.mode.clone());
            args.push("--auth-token".to_string());
            args.push(auth.token.clone());

            if let Some(header) = &auth.header_name {
                args.push("--auth-header".to_string());
                args.push(header.clone());
            }
        }

        args
    }

    /// Spawn the child with piped stdin, stdout and stderr.
    ///
    /// The child is killed if its handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(&self) -> Result<Child, SpawnError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.build_args())
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.spawn().map_err(|e| SpawnError::from_io(&self.program, e))
    }
}
