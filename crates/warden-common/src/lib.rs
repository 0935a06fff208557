//! # Warden Common
//!
//! Types shared by every warden crate.
//!
//! This crate provides the foundational abstractions the supervisor runtime
//! builds upon: the error taxonomy (launch errors, hook failures, termination
//! warnings, rotation failures) and the small domain enums that travel between
//! components (recovery actions, priorities, hook kinds).

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{
    LaunchError, LaunchResult, RotationFailure, SupervisorError, SupervisorResult,
    TerminationWarning,
};
pub use types::{HookKind, ProcessPriority, RecoveryAction, StopReason};
