//! # Warden Process
//!
//! Process-level operations for the supervisor:
//! - Launching the main process with priority and stream redirection
//! - Liveness checks and graceful/forced signals
//! - Process-tree introspection behind [`ProcessIntrospector`]
//! - Bottom-up termination of the whole tree in [`ProcessTreeController`]

pub mod check;
pub mod handle;
pub mod introspect;
pub mod signaller;
pub mod terminate;
pub mod tree;
pub mod validation;

#[cfg(windows)]
pub mod terminate_windows;

pub use check::{process_exists, process_running};
pub use handle::{ExitInfo, ProcessHandle};
pub use introspect::{native_introspector, ProcessInfo, ProcessIntrospector, SysinfoIntrospector};
pub use signaller::{OsSignaller, ProcessSignaller, TerminationSignal};
pub use terminate::{force_kill, request_close};
pub use tree::{LaunchSpec, LaunchedProcess, ProcessTreeController};
pub use validation::{validate_executable, validate_working_dir};

#[cfg(target_os = "linux")]
pub use introspect::ProcfsIntrospector;
