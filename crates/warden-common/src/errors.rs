//! Error types for the warden supervisor.
//!
//! Only [`LaunchError`] and an unresolved hook failure ever surface to the
//! caller of `Start`. [`TerminationWarning`] and [`RotationFailure`] describe
//! problems on paths that must always complete (shutdown, logging); they are
//! produced so callers can log them, never to abort an operation.

use crate::types::HookKind;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for supervisor operations.
pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;

/// Result type alias for process launch.
pub type LaunchResult<T> = std::result::Result<T, LaunchError>;

/// Main error type returned by the supervisor's public operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A lifecycle hook failed after all retries and was not ignorable.
    #[error("{hook} hook failed after {attempts} attempt(s): {outcome}")]
    HookFailed {
        hook: HookKind,
        outcome: String,
        attempts: u32,
    },

    /// The main process could not be launched.
    #[error("Launch failed: {0}")]
    Launch(#[from] LaunchError),

    /// The requested operation is not valid in the current lifecycle state.
    #[error("Invalid state for {service}: expected {expected}, got {actual}")]
    InvalidState {
        service: String,
        expected: String,
        actual: String,
    },

    /// Configuration could not be used.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SupervisorError {
    pub fn hook_failed(hook: HookKind, outcome: impl Into<String>, attempts: u32) -> Self {
        Self::HookFailed {
            hook,
            outcome: outcome.into(),
            attempts,
        }
    }

    pub fn invalid_state(
        service: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            service: service.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

/// Why a process could not be started.
///
/// None of these are retried by the component that produces them; the health
/// monitor's restart policy is the only retry path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Executable path invalid: {path} - {reason}")]
    PathInvalid { path: PathBuf, reason: String },

    #[error("Access denied: {path} - {reason}")]
    AccessDenied { path: PathBuf, reason: String },

    #[error("Spawn failed: {path} - {reason}")]
    SpawnFailed { path: PathBuf, reason: String },
}

impl LaunchError {
    pub fn path_invalid(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::PathInvalid {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn access_denied(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn spawn_failed(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Classify an OS spawn error.
    pub fn from_io(path: impl AsRef<Path>, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::path_invalid(path, err.to_string()),
            io::ErrorKind::PermissionDenied => Self::access_denied(path, err.to_string()),
            _ => Self::spawn_failed(path, err.to_string()),
        }
    }

    /// The executable (or working directory) the error refers to.
    pub fn path(&self) -> &Path {
        match self {
            Self::PathInvalid { path, .. }
            | Self::AccessDenied { path, .. }
            | Self::SpawnFailed { path, .. } => path,
        }
    }
}

/// A non-fatal problem met while killing a process.
///
/// Termination runs on the shutdown path and is unconditionally best-effort,
/// so these are always logged and never escalated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TerminationWarning {
    #[error("Process {pid} had already exited")]
    AlreadyExited { pid: u32 },

    #[error("Process {pid} handle invalid: {reason}")]
    InvalidHandle { pid: u32, reason: String },

    #[error("Permission denied while signalling process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("Failed to signal process {pid}: {reason}")]
    SignalFailed { pid: u32, reason: String },

    #[error("Process {pid} still running after force kill")]
    StillRunning { pid: u32 },
}

impl TerminationWarning {
    pub fn pid(&self) -> u32 {
        match self {
            Self::AlreadyExited { pid }
            | Self::InvalidHandle { pid, .. }
            | Self::PermissionDenied { pid }
            | Self::SignalFailed { pid, .. }
            | Self::StillRunning { pid } => *pid,
        }
    }

    pub fn signal_failed(pid: u32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            pid,
            reason: reason.into(),
        }
    }
}

/// A problem met while rotating a log file.
///
/// The sink keeps writing to the current file and retries rotation on the
/// next write that crosses the threshold.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RotationFailure {
    #[error("Failed to rename {from} to {to}: {reason}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    #[error("Failed to delete rotated file {path}: {reason}")]
    RetentionDelete { path: PathBuf, reason: String },

    #[error("Failed to reopen {path}: {reason}")]
    Reopen { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_error_classification() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = LaunchError::from_io("/opt/app/bin", &not_found);
        assert!(matches!(err, LaunchError::PathInvalid { .. }));
        assert_eq!(err.path(), Path::new("/opt/app/bin"));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            LaunchError::from_io("/opt/app/bin", &denied),
            LaunchError::AccessDenied { .. }
        ));

        let other = io::Error::new(io::ErrorKind::Other, "too many processes");
        assert!(matches!(
            LaunchError::from_io("/opt/app/bin", &other),
            LaunchError::SpawnFailed { .. }
        ));
    }

    #[test]
    fn test_supervisor_error_wraps_launch_error() {
        let err: SupervisorError = LaunchError::spawn_failed("app", "boom").into();
        assert!(matches!(err, SupervisorError::Launch(_)));
        assert!(err.to_string().contains("Spawn failed"));
    }

    #[test]
    fn test_hook_failed_message() {
        let err = SupervisorError::hook_failed(HookKind::PreLaunch, "exit code 3", 2);
        assert_eq!(
            err.to_string(),
            "pre-launch hook failed after 2 attempt(s): exit code 3"
        );
    }

    #[test]
    fn test_termination_warning_pid() {
        let warning = TerminationWarning::signal_failed(42, "EINVAL");
        assert_eq!(warning.pid(), 42);
        assert_eq!(TerminationWarning::StillRunning { pid: 7 }.pid(), 7);
    }
}
