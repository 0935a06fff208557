//! Process existence and liveness checks.

use std::io;

/// Check if a process with the given PID exists.
///
/// On Unix this is `kill(pid, 0)`: no signal is delivered, only the
/// existence/permission check runs. A zombie still "exists" here; use
/// [`process_running`] when an unreaped child must count as gone.
pub fn process_exists(pid: u32) -> io::Result<bool> {
    #[cfg(unix)]
    {
        process_exists_unix(pid)
    }

    #[cfg(windows)]
    {
        process_exists_windows(pid)
    }
}

/// Check if a process is alive and not a zombie.
///
/// Errors are treated as "not running"; callers use this to poll for exit.
pub fn process_running(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(stat) = crate::introspect::read_proc_stat(pid) {
            return !matches!(stat.state, 'Z' | 'X');
        }
        false
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        process_exists_unix(pid).unwrap_or(false)
    }

    #[cfg(windows)]
    {
        process_running_windows(pid)
    }
}

#[cfg(unix)]
fn process_exists_unix(pid: u32) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        // Exists, but owned by someone else
        Err(Errno::EPERM) => Ok(true),
        Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
    }
}

#[cfg(windows)]
fn process_exists_windows(pid: u32) -> io::Result<bool> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    const ERROR_INVALID_PARAMETER: u32 = 0x80070057;
    const ERROR_ACCESS_DENIED: u32 = 0x80070005;

    unsafe {
        match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
            Ok(handle) => {
                let _ = CloseHandle(handle);
                Ok(true)
            }
            Err(e) => {
                let code = e.code().0 as u32;
                if code == ERROR_INVALID_PARAMETER {
                    Ok(false)
                } else if code == ERROR_ACCESS_DENIED {
                    Ok(true)
                } else {
                    Err(io::Error::new(io::ErrorKind::Other, e.to_string()))
                }
            }
        }
    }
}

#[cfg(windows)]
fn process_running_windows(pid: u32) -> bool {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    const STILL_ACTIVE: u32 = 259;

    unsafe {
        let handle = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
            Ok(h) => h,
            Err(_) => return false,
        };
        let mut code = 0u32;
        let running = GetExitCodeProcess(handle, &mut code).is_ok() && code == STILL_ACTIVE;
        let _ = CloseHandle(handle);
        running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_exists() {
        let current_pid = std::process::id();
        assert!(process_exists(current_pid).unwrap());
        assert!(process_running(current_pid));
    }

    #[test]
    fn test_pid_zero_is_not_running() {
        assert!(!process_running(0));
    }

    #[test]
    #[cfg(unix)]
    fn test_system_process() {
        assert!(process_exists(1).unwrap());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_zombie_is_not_running() {
        // Spawn and let it exit without reaping
        let child = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .unwrap();
        let pid = child.id();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while process_running(pid) && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        assert!(!process_running(pid));
        assert!(process_exists(pid).unwrap());

        let mut child = child;
        child.wait().unwrap();
    }
}
