//! # Warden Supervisor
//!
//! Runs one service under supervision:
//! - pre-launch hook, launch of the main process, output capture
//! - heartbeat monitoring with restart budget and failure program
//! - orderly stop: pre-stop hook, process tree teardown, post-stop hook
//!
//! The host hands [`ServiceSupervisor::start`] a [`SupervisorConfig`] and
//! later calls [`ServiceSupervisor::stop`]; [`ServiceSupervisor::current_state`]
//! answers status queries at any time.

pub mod config;
pub mod session;
pub mod supervisor;

pub use config::{
    EnvVar, FailureProgramConfig, HealthConfig, HookConfig, HooksConfig, RotationConfig,
    SupervisorConfig,
};
pub use session::Session;
pub use supervisor::{ServiceSupervisor, SupervisorStatus};

// Re-exported so hosts need only this crate
pub use warden_common::{RecoveryAction, StopReason, SupervisorError, SupervisorResult};
pub use warden_state::SupervisorState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
