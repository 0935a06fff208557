//! Core domain types used throughout warden.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Policy applied when the health monitor's failure threshold is crossed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Log the failure run and keep going.
    #[default]
    None,
    /// Terminate the process tree and relaunch the main process.
    RestartProcess,
    /// Cycle the whole service sequence (stop hooks, relaunch, start hooks)
    /// inside the current session.
    RestartService,
    /// Run the failure program and fail the session.
    RunFailureProgram,
}

impl RecoveryAction {
    /// Whether this action relaunches the main process.
    pub fn is_restart(&self) -> bool {
        matches!(self, RecoveryAction::RestartProcess | RecoveryAction::RestartService)
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::None => write!(f, "none"),
            RecoveryAction::RestartProcess => write!(f, "restart_process"),
            RecoveryAction::RestartService => write!(f, "restart_service"),
            RecoveryAction::RunFailureProgram => write!(f, "run_failure_program"),
        }
    }
}

/// Scheduling priority of the main process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessPriority {
    Idle,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
    RealTime,
}

impl ProcessPriority {
    /// POSIX nice value for this priority.
    pub fn nice_value(&self) -> i32 {
        match self {
            ProcessPriority::Idle => 19,
            ProcessPriority::BelowNormal => 10,
            ProcessPriority::Normal => 0,
            ProcessPriority::AboveNormal => -5,
            ProcessPriority::High => -10,
            ProcessPriority::RealTime => -20,
        }
    }

    /// Windows priority-class process creation flag.
    pub fn windows_priority_class(&self) -> u32 {
        match self {
            ProcessPriority::Idle => 0x0000_0040,
            ProcessPriority::BelowNormal => 0x0000_4000,
            ProcessPriority::Normal => 0x0000_0020,
            ProcessPriority::AboveNormal => 0x0000_8000,
            ProcessPriority::High => 0x0000_0080,
            ProcessPriority::RealTime => 0x0000_0100,
        }
    }
}

/// Lifecycle point at which an auxiliary program runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    PreLaunch,
    PostLaunch,
    PreStop,
    PostStop,
    FailureProgram,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::PreLaunch => write!(f, "pre-launch"),
            HookKind::PostLaunch => write!(f, "post-launch"),
            HookKind::PreStop => write!(f, "pre-stop"),
            HookKind::PostStop => write!(f, "post-stop"),
            HookKind::FailureProgram => write!(f, "failure-program"),
        }
    }
}

/// Why a stop was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The OS service manager asked the service to stop.
    ServiceControl,
    /// The machine is shutting down.
    SystemShutdown,
    /// The host process received a termination signal.
    Signal(String),
    /// Any other caller-supplied reason.
    Requested(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::ServiceControl => write!(f, "service control request"),
            StopReason::SystemShutdown => write!(f, "system shutdown"),
            StopReason::Signal(name) => write!(f, "signal {}", name),
            StopReason::Requested(reason) => write!(f, "{}", reason),
        }
    }
}
