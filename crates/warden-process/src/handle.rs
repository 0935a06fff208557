//! Handle to a launched process and its exit watcher.

use crate::signaller::{ProcessSignaller, TerminationSignal};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use warden_common::TerminationWarning;

struct SignalRequest {
    signal: TerminationSignal,
    reply: oneshot::Sender<Result<(), TerminationWarning>>,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    pub exited_at: SystemTime,
}

/// Identity of a launched process plus a view of its exit status.
///
/// The `Child` itself lives in the exit watcher task, which reaps it; the
/// handle only observes the result. Signals for an owned process are sent
/// by that same task, so they can never reach a recycled pid. Cloning is
/// cheap.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: u32,
    started_at: SystemTime,
    exit: Option<watch::Receiver<Option<ExitInfo>>>,
    signals: Option<mpsc::UnboundedSender<SignalRequest>>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("started_at", &self.started_at)
            .field("owned", &self.is_owned())
            .field("exit", &self.exit_info())
            .finish()
    }
}

impl ProcessHandle {
    /// Take ownership of `child` and spawn a task that waits for it.
    /// Signals requested through [`ProcessHandle::signal`] go out via
    /// `signaller`.
    pub fn watch(
        child: Child,
        label: &str,
        started_at: SystemTime,
        signaller: Arc<dyn ProcessSignaller>,
    ) -> Self {
        let pid = child.id().unwrap_or(0);
        let (tx, rx) = watch::channel(None);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        spawn_exit_watcher(child, label.to_string(), pid, tx, signal_rx, signaller);

        Self {
            pid,
            started_at,
            exit: Some(rx),
            signals: Some(signal_tx),
        }
    }

    /// A handle for a process this crate did not spawn. Exit is observed by
    /// polling only.
    pub fn unowned(pid: u32, started_at: SystemTime) -> Self {
        Self {
            pid,
            started_at,
            exit: None,
            signals: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Whether the exit watcher is attached.
    pub fn is_owned(&self) -> bool {
        self.exit.is_some()
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit.as_ref().and_then(|rx| *rx.borrow())
    }

    /// `true` once the watcher has reaped the process.
    ///
    /// Unowned handles always report `false`; ask the signaller instead.
    pub fn has_exited(&self) -> bool {
        self.exit_info().is_some()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_info().and_then(|info| info.code)
    }

    /// Signal an owned process through its exit watcher.
    ///
    /// Returns `None` for unowned handles. Once the process has been reaped
    /// the answer is always `AlreadyExited`.
    pub async fn signal(
        &self,
        signal: TerminationSignal,
    ) -> Option<Result<(), TerminationWarning>> {
        let signals = self.signals.as_ref()?;
        let gone = TerminationWarning::AlreadyExited { pid: self.pid };

        let (reply, answer) = oneshot::channel();
        if signals.send(SignalRequest { signal, reply }).is_err() {
            return Some(Err(gone));
        }
        Some(answer.await.unwrap_or(Err(gone)))
    }

    /// Subscribe to the exit notification.
    pub fn subscribe(&self) -> Option<watch::Receiver<Option<ExitInfo>>> {
        self.exit.clone()
    }

    /// Wait up to `timeout` for the watcher to report exit.
    ///
    /// Returns `false` on timeout or for unowned handles.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let Some(mut rx) = self.exit.clone() else {
            return false;
        };

        let wait = async {
            loop {
                if rx.borrow_and_update().is_some() {
                    return true;
                }
                if rx.changed().await.is_err() {
                    // Watcher gone; its last value is final
                    return rx.borrow().is_some();
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }
}

/// Wait for `child` in the background and publish its exit.
///
/// Reaping here is what keeps exited children from lingering as zombies.
fn spawn_exit_watcher(
    mut child: Child,
    label: String,
    pid: u32,
    tx: watch::Sender<Option<ExitInfo>>,
    mut signals: mpsc::UnboundedReceiver<SignalRequest>,
    signaller: Arc<dyn ProcessSignaller>,
) {
    tokio::spawn(async move {
        debug!("Exit watcher started for {} (PID: {})", label, pid);

        // Reaping only happens in this task, so `child.id()` stays valid
        // for the whole time a request is handled
        let result = loop {
            tokio::select! {
                result = child.wait() => break result,
                Some(request) = signals.recv() => {
                    let outcome = match child.id() {
                        Some(live) => signaller.deliver(live, request.signal),
                        None => Err(TerminationWarning::AlreadyExited { pid }),
                    };
                    let _ = request.reply.send(outcome);
                }
            }
        };
        signals.close();

        let code = match result {
            Ok(status) => {
                if status.success() {
                    info!("Process {} (PID: {}) exited successfully", label, pid);
                } else {
                    warn!(
                        "Process {} (PID: {}) exited with status: {:?}",
                        label,
                        pid,
                        status.code()
                    );
                }
                status.code()
            }
            Err(e) => {
                error!("Failed to wait for process {} (PID: {}): {}", label, pid, e);
                None
            }
        };

        let _ = tx.send(Some(ExitInfo {
            code,
            exited_at: SystemTime::now(),
        }));
    });
}
