//! One supervised run, from launch to stop or terminal failure.

use crate::config::SupervisorConfig;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use warden_log_collection::{OutputCapture, StreamStats, StreamType};
use warden_monitoring::HealthMonitor;
use warden_process::{LaunchedProcess, ProcessHandle, ProcessTreeController};

/// Live handles of a session.
///
/// Only the supervisor holds one, behind its control lock; the tree
/// controller and the monitor work on it by borrow.
pub struct Session {
    config: Arc<SupervisorConfig>,
    process: Option<ProcessHandle>,
    /// Descendants seen during heartbeats, pid to start time.
    tracked: BTreeMap<u32, SystemTime>,
    started_at: DateTime<Utc>,
    capture: OutputCapture,
    pub(crate) monitor: Option<HealthMonitor>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("service_name", &self.config.service_name)
            .field("main_pid", &self.main_pid())
            .field("tracked", &self.tracked.len())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(config: Arc<SupervisorConfig>, capture: OutputCapture) -> Self {
        Self {
            config,
            process: None,
            tracked: BTreeMap::new(),
            started_at: Utc::now(),
            capture,
            monitor: None,
        }
    }

    pub fn config(&self) -> &Arc<SupervisorConfig> {
        &self.config
    }

    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    pub fn main_pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid())
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn tracked(&self) -> &BTreeMap<u32, SystemTime> {
        &self.tracked
    }

    pub fn output_stats(&self, stream: StreamType) -> StreamStats {
        self.capture.stats(stream)
    }

    /// Adopt a freshly launched main process and wire its pipes to the sinks.
    pub(crate) fn attach(&mut self, launched: LaunchedProcess) -> ProcessHandle {
        if let Some(old) = self.process.take() {
            // Callers terminate the old tree first
            warn!(
                "Replacing main process PID {} of {} that was not torn down",
                old.pid(),
                self.config.service_name
            );
        }

        if let Some(stdout) = launched.stdout {
            self.capture.attach(stdout, StreamType::Stdout);
        }
        if let Some(stderr) = launched.stderr {
            self.capture.attach(stderr, StreamType::Stderr);
        }

        self.process = Some(launched.handle.clone());
        launched.handle
    }

    /// Heartbeat check. A session without a main process is not alive.
    pub(crate) fn is_alive(&self) -> bool {
        self.process
            .as_ref()
            .map(|p| !p.has_exited())
            .unwrap_or(false)
    }

    /// Remember the current descendants so they can be found at teardown
    /// even after their parent has died.
    pub(crate) fn track_descendants(&mut self, controller: &ProcessTreeController) {
        let Some(ref root) = self.process else {
            return;
        };

        self.tracked
            .retain(|pid, started_at| controller.still_matches(*pid, *started_at));

        for info in controller.discover_descendants(root) {
            if self.tracked.insert(info.pid, info.start_time).is_none() {
                debug!(
                    "Tracking descendant PID {} of {} (parent {:?})",
                    info.pid, self.config.service_name, info.parent_pid
                );
            }
        }
    }

    /// Kill the main process and everything it spawned.
    ///
    /// Never fails; problems are logged. Returns the main process exit code
    /// when it has one.
    pub(crate) async fn terminate_tree(
        &mut self,
        controller: &ProcessTreeController,
        per_process_timeout: Duration,
    ) -> Option<i32> {
        let Some(root) = self.process.take() else {
            return None;
        };

        let warnings = controller
            .terminate(&root, &self.tracked, per_process_timeout)
            .await;
        for warning in &warnings {
            warn!(
                "Termination of {} (PID {}): {}",
                self.config.service_name,
                warning.pid(),
                warning
            );
        }
        self.tracked.clear();

        root.exit_code()
    }

    /// Flush and close the output sinks.
    pub(crate) async fn close_capture(&self) {
        self.capture.close().await;
    }
}
