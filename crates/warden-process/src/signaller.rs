//! Signal delivery seam used by the tree controller.

use warden_common::TerminationWarning;

/// The two requests a teardown sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// Graceful: SIGTERM, or window close / CTRL_BREAK on Windows.
    Close,
    Kill,
}

/// Delivers termination requests to processes by pid.
pub trait ProcessSignaller: Send + Sync {
    /// Whether the process is still alive (zombies count as exited).
    fn is_running(&self, pid: u32) -> bool;

    /// Ask the process to exit.
    fn request_close(&self, pid: u32) -> Result<(), TerminationWarning>;

    /// Kill the process outright.
    fn force_kill(&self, pid: u32) -> Result<(), TerminationWarning>;

    fn deliver(&self, pid: u32, signal: TerminationSignal) -> Result<(), TerminationWarning> {
        match signal {
            TerminationSignal::Close => self.request_close(pid),
            TerminationSignal::Kill => self.force_kill(pid),
        }
    }
}

/// Signals real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSignaller;

impl ProcessSignaller for OsSignaller {
    fn is_running(&self, pid: u32) -> bool {
        crate::check::process_running(pid)
    }

    fn request_close(&self, pid: u32) -> Result<(), TerminationWarning> {
        crate::terminate::request_close(pid)
    }

    fn force_kill(&self, pid: u32) -> Result<(), TerminationWarning> {
        crate::terminate::force_kill(pid)
    }
}
