//! Process termination primitives.
//!
//! Both calls report problems as [`TerminationWarning`]s; callers log them and
//! carry on.

use warden_common::TerminationWarning;

/// Ask a process to shut down.
///
/// Unix: SIGTERM. Windows: post WM_CLOSE to the process's top-level windows,
/// falling back to Ctrl+Break for console processes.
pub fn request_close(pid: u32) -> Result<(), TerminationWarning> {
    #[cfg(unix)]
    {
        send_signal(pid, nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(windows)]
    {
        use std::time::Duration;

        if crate::terminate_windows::close_main_windows(pid) {
            return Ok(());
        }
        crate::terminate_windows::send_ctrl_break(pid, Duration::from_secs(1))
            .map_err(|e| TerminationWarning::signal_failed(pid, e))
    }
}

/// Kill a process without giving it a chance to clean up.
///
/// Unix: SIGKILL. Windows: TerminateProcess.
pub fn force_kill(pid: u32) -> Result<(), TerminationWarning> {
    #[cfg(unix)]
    {
        send_signal(pid, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(windows)]
    {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

        unsafe {
            let handle = match OpenProcess(PROCESS_TERMINATE, false, pid) {
                Ok(h) if !h.is_invalid() => h,
                Ok(_) => {
                    return Err(TerminationWarning::InvalidHandle {
                        pid,
                        reason: "OpenProcess returned an invalid handle".to_string(),
                    })
                }
                Err(e) => {
                    return Err(if crate::check::process_running(pid) {
                        TerminationWarning::InvalidHandle {
                            pid,
                            reason: e.to_string(),
                        }
                    } else {
                        TerminationWarning::AlreadyExited { pid }
                    })
                }
            };

            let result = TerminateProcess(handle, 1);
            let _ = CloseHandle(handle);

            result.map_err(|e| {
                TerminationWarning::signal_failed(pid, format!("TerminateProcess failed: {}", e))
            })
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), TerminationWarning> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 || pid > i32::MAX as u32 {
        return Err(TerminationWarning::InvalidHandle {
            pid,
            reason: "pid out of range".to_string(),
        });
    }

    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(TerminationWarning::AlreadyExited { pid }),
        Err(Errno::EPERM) => Err(TerminationWarning::PermissionDenied { pid }),
        Err(e) => Err(TerminationWarning::signal_failed(pid, e.to_string())),
    }
}
