//! Child process state machine and restart policy.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay before restarting a crashed child.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Lifecycle state of the supervised child.
///
/// `Stopped -> Starting -> Running -> Stopped`. Only `Running` is healthy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl ProcessState {
    #[must_use]
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Running)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
        }
    }
}

/// How a child instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited with code 0.
    Clean,
    /// Exited with a non-zero code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
    /// The exit status could not be determined.
    Unknown,
}

impl ExitKind {
    /// Classify an exit status.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return if code == 0 {
                Self::Clean
            } else {
                Self::Code(code)
            };
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }

        Self::Unknown
    }

    /// True for the signals used for graceful shutdown (SIGTERM, SIGINT).
    #[must_use]
    pub fn is_shutdown_signal(self) -> bool {
        match self {
            Self::Signal(signal) => shutdown_signals().contains(&signal),
            _ => false,
        }
    }
}

#[cfg(unix)]
fn shutdown_signals() -> [i32; 2] {
    use nix::sys::signal::Signal;
    [Signal::SIGTERM as i32, Signal::SIGINT as i32]
}

#[cfg(not(unix))]
fn shutdown_signals() -> [i32; 2] {
    [15, 2]
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "exit code 0"),
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => match signal_name(*signal) {
                Some(name) => write!(f, "signal {signal} ({name})"),
                None => write!(f, "signal {signal}"),
            },
            Self::Unknown => write!(f, "unknown exit status"),
        }
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> Option<&'static str> {
    nix::sys::signal::Signal::try_from(signal)
        .ok()
        .map(nix::sys::signal::Signal::as_str)
}

#[cfg(not(unix))]
fn signal_name(_signal: i32) -> Option<&'static str> {
    None
}

/// When and how often a crashed child is restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Fixed wait before each restart.
    pub delay: Duration,
    /// Cap on restarts since the last explicit start. `None` is unlimited.
    pub max_attempts: Option<u32>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RESTART_DELAY,
            max_attempts: None,
        }
    }
}

impl RestartPolicy {
    /// Never restart.
    #[must_use]
    pub fn never() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: Some(0),
        }
    }

    /// Decide whether an exit warrants another instance.
    ///
    /// Clean exits and graceful-shutdown signals never restart; anything
    /// else does, until `max_attempts` restarts have been made.
    #[must_use]
    pub fn should_restart(&self, exit: ExitKind, restarts_so_far: u32) -> bool {
        if exit == ExitKind::Clean || exit.is_shutdown_signal() {
            return false;
        }
        self.max_attempts.map_or(true, |max| restarts_so_far < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_is_healthy() {
        assert!(!ProcessState::Stopped.is_healthy());
        assert!(!ProcessState::Starting.is_healthy());
        assert!(ProcessState::Running.is_healthy());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ProcessState::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert_eq!(ProcessState::default(), ProcessState::Stopped);
    }

    #[test]
    fn test_clean_exit_never_restarts() {
        let policy = RestartPolicy::default();
        assert!(!policy.should_restart(ExitKind::Clean, 0));
    }

    #[test]
    fn test_shutdown_signals_never_restart() {
        let policy = RestartPolicy::default();
        assert!(!policy.should_restart(ExitKind::Signal(15), 0));
        assert!(!policy.should_restart(ExitKind::Signal(2), 0));
    }

    #[test]
    fn test_crashes_restart() {
        let policy = RestartPolicy::default();
        assert!(policy.should_restart(ExitKind::Code(1), 0));
        assert!(policy.should_restart(ExitKind::Signal(9), 1000));
        assert!(policy.should_restart(ExitKind::Unknown, 0));
    }

    #[test]
    fn test_max_attempts_bounds_restarts() {
        let policy = RestartPolicy {
            delay: Duration::from_millis(1),
            max_attempts: Some(2),
        };
        assert!(policy.should_restart(ExitKind::Code(1), 0));
        assert!(policy.should_restart(ExitKind::Code(1), 1));
        assert!(!policy.should_restart(ExitKind::Code(1), 2));
        assert!(!RestartPolicy::never().should_restart(ExitKind::Code(1), 0));
    }

    #[test]
    fn test_exit_kind_display() {
        assert_eq!(ExitKind::Clean.to_string(), "exit code 0");
        assert_eq!(ExitKind::Code(3).to_string(), "exit code 3");
        #[cfg(unix)]
        assert_eq!(ExitKind::Signal(9).to_string(), "signal 9 (SIGKILL)");
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_kind_from_status() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(ExitKind::from_status(ExitStatus::from_raw(0)), ExitKind::Clean);
        assert_eq!(
            ExitKind::from_status(ExitStatus::from_raw(3 << 8)),
            ExitKind::Code(3)
        );
        assert_eq!(ExitKind::from_status(ExitStatus::from_raw(9)), ExitKind::Signal(9));
    }
}
