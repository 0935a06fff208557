//! Windows graceful-close helpers.
//!
//! GUI processes get WM_CLOSE on their top-level windows. Console processes
//! (launched with CREATE_NEW_PROCESS_GROUP) get Ctrl+Break on their group.

use parking_lot::Mutex;
use std::time::Duration;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, WPARAM};
use windows::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowThreadProcessId, IsWindowVisible, PostMessageW, WM_CLOSE,
};

/// Console control events are process-global; serialize them.
static CONSOLE_OPERATION_LOCK: Mutex<()> = Mutex::new(());

struct CloseRequest {
    pid: u32,
    posted: bool,
}

unsafe extern "system" fn close_window_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let request = &mut *(lparam.0 as *mut CloseRequest);

    let mut owner = 0u32;
    GetWindowThreadProcessId(hwnd, Some(&mut owner as *mut u32));
    if owner == request.pid && IsWindowVisible(hwnd).as_bool() {
        if PostMessageW(hwnd, WM_CLOSE, WPARAM(0), LPARAM(0)).is_ok() {
            request.posted = true;
        }
    }
    BOOL(1)
}

/// Post WM_CLOSE to every visible top-level window owned by `pid`.
///
/// Returns `true` if at least one window received the message.
pub fn close_main_windows(pid: u32) -> bool {
    let mut request = CloseRequest { pid, posted: false };
    unsafe {
        let _ = EnumWindows(
            Some(close_window_callback),
            LPARAM(&mut request as *mut CloseRequest as isize),
        );
    }
    request.posted
}

/// Send Ctrl+Break to the process group rooted at `pid`.
pub fn send_ctrl_break(pid: u32, timeout: Duration) -> Result<(), String> {
    if pid == 0 {
        return Err(format!("Invalid PID: {}", pid));
    }

    let _lock = CONSOLE_OPERATION_LOCK.lock();

    // GenerateConsoleCtrlEvent can hang when the target is mid-teardown
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let result = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) }
            .map_err(|e| e.to_string());
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("Failed to send Ctrl+Break to PID {}: {}", pid, e)),
        Err(_) => Err(format!(
            "Timeout sending Ctrl+Break to PID {} after {:?}",
            pid, timeout
        )),
    }
}
