//! ServiceSupervisor - sequences hooks, the process tree and the health
//! monitor for one service.
//!
//! Locking: the control lock (`tokio::sync::Mutex`) serializes start, stop
//! and monitor-driven recovery. The status snapshot sits behind its own
//! `parking_lot::RwLock` so `current_state` never waits on them.
//!
//! Stop cancels the monitor and joins it with the control lock released; a
//! restart already in flight finishes (or sees the stop and bails out)
//! before the tree is torn down.

use crate::config::SupervisorConfig;
use crate::session::Session;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use warden_common::{
    HookKind, RecoveryAction, StopReason, SupervisorError, SupervisorResult,
};
use warden_hooks::{HookReport, HookRunner};
use warden_log_collection::{OutputCapture, StreamStats, StreamType};
use warden_monitoring::{HealthCounters, HealthMonitor, RecoveryTarget};
use warden_process::{ProcessHandle, ProcessTreeController};
use warden_process_file::StatusFile;
use warden_state::{StateTransition, SupervisorState, SupervisorStateMachine};

/// Read-only snapshot for external status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    /// Set while a main process is alive.
    pub main_process_id: Option<u32>,
    pub last_exit_code: Option<i32>,
    pub restart_attempts: u32,
    pub last_recovery_action: Option<RecoveryAction>,
}

#[derive(Debug)]
struct StatusCell {
    state: SupervisorState,
    process: Option<ProcessHandle>,
    last_exit_code: Option<i32>,
    restart_attempts: u32,
    last_recovery_action: Option<RecoveryAction>,
}

impl StatusCell {
    fn snapshot(&self) -> SupervisorStatus {
        let live = self.process.as_ref().filter(|p| !p.has_exited());
        SupervisorStatus {
            state: self.state,
            main_process_id: live.map(|p| p.pid()),
            last_exit_code: self
                .process
                .as_ref()
                .and_then(|p| p.exit_code())
                .or(self.last_exit_code),
            restart_attempts: self.restart_attempts,
            last_recovery_action: self.last_recovery_action,
        }
    }
}

struct Control {
    machine: SupervisorStateMachine,
    /// Configuration of the latest start; kept after a failure so a later
    /// stop can still run the stop hooks.
    config: Option<Arc<SupervisorConfig>>,
    session: Option<Session>,
}

struct Inner {
    service_name: String,
    controller: ProcessTreeController,
    control: Mutex<Control>,
    status: RwLock<StatusCell>,
}

/// Supervises one service. Cloning yields another handle to the same
/// supervisor.
#[derive(Clone)]
pub struct ServiceSupervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ServiceSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSupervisor")
            .field("service_name", &self.inner.service_name)
            .field("status", &self.current_state())
            .finish()
    }
}

impl ServiceSupervisor {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self::with_controller(service_name, ProcessTreeController::native())
    }

    /// Supervisor using `controller` for all process work.
    pub fn with_controller(
        service_name: impl Into<String>,
        controller: ProcessTreeController,
    ) -> Self {
        let service_name = service_name.into();
        Self {
            inner: Arc::new(Inner {
                controller,
                control: Mutex::new(Control {
                    machine: SupervisorStateMachine::new(&service_name),
                    config: None,
                    session: None,
                }),
                status: RwLock::new(StatusCell {
                    state: SupervisorState::Idle,
                    process: None,
                    last_exit_code: None,
                    restart_attempts: 0,
                    last_recovery_action: None,
                }),
                service_name,
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    /// Thread-safe snapshot; never waits on a start, stop or restart.
    pub fn current_state(&self) -> SupervisorStatus {
        self.inner.status.read().snapshot()
    }

    /// Recent lifecycle transitions, oldest first.
    pub async fn transition_history(&self) -> Vec<StateTransition> {
        self.inner.control.lock().await.machine.history().to_vec()
    }

    /// Heartbeat counters of the running session, if it is monitored.
    pub async fn health_counters(&self) -> Option<HealthCounters> {
        let control = self.inner.control.lock().await;
        control
            .session
            .as_ref()
            .and_then(|s| s.monitor.as_ref())
            .map(|m| m.counters())
    }

    pub async fn output_stats(&self, stream: StreamType) -> Option<StreamStats> {
        let control = self.inner.control.lock().await;
        control.session.as_ref().map(|s| s.output_stats(stream))
    }

    /// Start a new session.
    ///
    /// A no-op while already running. Fails with `HookFailed` when the
    /// pre-launch hook fails and is not ignored, or with a launch error; the
    /// supervisor is `Failed` in both cases.
    pub async fn start(&self, config: SupervisorConfig) -> SupervisorResult<()> {
        let inner = &self.inner;
        let config = Arc::new(config);
        let mut control = inner.control.lock().await;

        let state = control.machine.current_state();
        if state == SupervisorState::Running {
            info!("Service {} is already running", inner.service_name);
            return Ok(());
        }
        if !control.machine.can_start() {
            return Err(SupervisorError::invalid_state(
                &inner.service_name,
                "idle, stopped or failed",
                state.to_string(),
            ));
        }

        info!("Starting service {}", inner.service_name);
        control
            .machine
            .transition_to(SupervisorState::PreLaunching, Some("start requested".to_string()))?;
        {
            let mut status = inner.status.write();
            status.state = SupervisorState::PreLaunching;
            status.process = None;
            status.last_exit_code = None;
            status.restart_attempts = 0;
            status.last_recovery_action = None;
        }
        control.config = Some(Arc::clone(&config));

        if let Some(report) = inner.run_hook(&config, HookKind::PreLaunch).await {
            if !report.may_proceed() {
                error!(
                    "Pre-launch hook failed for {}: {}",
                    inner.service_name, report.outcome
                );
                inner.advance(&mut control, SupervisorState::Failed, "pre-launch hook failed");
                inner.persist_status(&control).await;
                return Err(SupervisorError::hook_failed(
                    report.kind,
                    report.outcome.to_string(),
                    report.attempts,
                ));
            }
        }

        inner.advance(&mut control, SupervisorState::Launching, "pre-launch complete");

        let capture = match OutputCapture::open(&config.service_name, &config.capture_config()) {
            Ok(capture) => capture,
            Err(e) => {
                error!("Failed to open output sinks for {}: {}", inner.service_name, e);
                inner.advance(&mut control, SupervisorState::Failed, "output sinks unavailable");
                inner.persist_status(&control).await;
                return Err(e.into());
            }
        };

        let launched = match inner
            .controller
            .launch(&config.launch_spec(), &config.service_name)
        {
            Ok(launched) => launched,
            Err(e) => {
                error!("Failed to launch {}: {}", inner.service_name, e);
                capture.close().await;
                inner.advance(&mut control, SupervisorState::Failed, e.to_string());
                inner.persist_status(&control).await;
                return Err(e.into());
            }
        };

        let mut session = Session::new(Arc::clone(&config), capture);
        let handle = session.attach(launched);
        inner.status.write().process = Some(handle.clone());
        control.session = Some(session);

        inner.advance(
            &mut control,
            SupervisorState::Running,
            format!("main process PID {}", handle.pid()),
        );
        inner.persist_status(&control).await;
        info!(
            "Service {} running (PID: {})",
            inner.service_name,
            handle.pid()
        );

        if let Some(report) = inner.run_hook(&config, HookKind::PostLaunch).await {
            inner.log_unresolved(&report);
        }

        if config.health.enable_health_monitoring {
            let mut monitor = HealthMonitor::new(&config.service_name, config.monitor_policy());
            monitor.start(Arc::new(SessionProbe {
                inner: Arc::downgrade(&self.inner),
            }));
            if let Some(ref mut session) = control.session {
                session.monitor = Some(monitor);
            }
        } else {
            debug!("Health monitoring disabled for {}", inner.service_name);
        }

        Ok(())
    }

    /// Stop the session. Best-effort: every failure on the way is logged and
    /// the supervisor always ends up `Stopped`.
    pub async fn stop(&self, reason: StopReason) -> SupervisorResult<()> {
        let inner = &self.inner;

        let monitor = {
            let mut control = inner.control.lock().await;
            match control.machine.current_state() {
                SupervisorState::Idle | SupervisorState::Stopped => {
                    debug!("Service {} is not running; nothing to stop", inner.service_name);
                    return Ok(());
                }
                SupervisorState::Stopping | SupervisorState::PostStopping => {
                    debug!("Service {} is already stopping", inner.service_name);
                    return Ok(());
                }
                _ => {}
            }

            info!("Stopping service {} ({})", inner.service_name, reason);
            inner.advance(&mut control, SupervisorState::Stopping, reason.to_string());

            let monitor = control.session.as_mut().and_then(|s| s.monitor.take());
            if let Some(ref monitor) = monitor {
                monitor.cancel();
            }
            monitor
        };

        // Joined without the control lock: a restart in flight needs it
        if let Some(mut monitor) = monitor {
            monitor.stop().await;
        }

        let mut control = inner.control.lock().await;
        let config = control.config.clone();

        if let Some(ref config) = config {
            if let Some(report) = inner.run_hook(config, HookKind::PreStop).await {
                inner.log_unresolved(&report);
            }
        }

        if let Some(mut session) = control.session.take() {
            let timeout = session.config().stop_timeout;
            let exit_code = session.terminate_tree(&inner.controller, timeout).await;
            session.close_capture().await;
            inner.record_exit(exit_code);
        }

        inner.advance(&mut control, SupervisorState::PostStopping, "process tree terminated");
        if let Some(ref config) = config {
            if let Some(report) = inner.run_hook(config, HookKind::PostStop).await {
                inner.log_unresolved(&report);
            }
        }

        inner.advance(&mut control, SupervisorState::Stopped, reason.to_string());

        if let Some(path) = config.as_ref().and_then(|c| c.status_file.as_ref()) {
            if let Err(e) = StatusFile::delete(path).await {
                warn!("Failed to remove status file {}: {}", path.display(), e);
            }
        }

        info!("Service {} stopped", inner.service_name);
        Ok(())
    }
}

impl Inner {
    /// Move to `target`; off-graph moves are forced (and logged) so the
    /// lifecycle can always make progress.
    fn advance(&self, control: &mut Control, target: SupervisorState, reason: impl Into<String>) {
        let reason = Some(reason.into());
        if control.machine.transition_to(target, reason.clone()).is_err() {
            control.machine.force_transition(target, reason);
        }
        self.status.write().state = target;
    }

    /// The main process is gone; keep its exit code for status queries.
    fn record_exit(&self, exit_code: Option<i32>) {
        let mut status = self.status.write();
        let code = exit_code.or_else(|| status.process.as_ref().and_then(|p| p.exit_code()));
        status.process = None;
        if code.is_some() {
            status.last_exit_code = code;
        }
    }

    async fn run_hook(&self, config: &SupervisorConfig, kind: HookKind) -> Option<HookReport> {
        let hook = config.hook(kind)?;
        let runner = HookRunner::new(config.service_name.clone());
        Some(runner.run(kind, &hook.to_spec()).await)
    }

    /// Hooks whose failure never blocks the lifecycle.
    fn log_unresolved(&self, report: &HookReport) {
        if !report.may_proceed() {
            warn!(
                "{} hook for {} failed after {} attempt(s): {}; continuing",
                report.kind, self.service_name, report.attempts, report.outcome
            );
        }
    }

    /// Write the status file if one is configured. Failures are logged.
    async fn persist_status(&self, control: &Control) {
        let Some(config) = control.config.as_ref() else {
            return;
        };
        let Some(ref path) = config.status_file else {
            return;
        };

        let snapshot = self.status.read().snapshot();
        let mut file = StatusFile::new(&config.service_name, snapshot.state);
        file.pid = snapshot.main_process_id;
        file.started_at = control.session.as_ref().map(|s| s.started_at());
        file.restart_attempts = snapshot.restart_attempts;
        file.last_exit_code = snapshot.last_exit_code;

        if let Err(e) = file.save(path).await {
            warn!("Failed to write status file {}: {}", path.display(), e);
        }
    }

    async fn heartbeat(&self) -> bool {
        let mut control = self.control.lock().await;
        let Some(ref mut session) = control.session else {
            return false;
        };

        let alive = session.is_alive();
        if alive {
            session.track_descendants(&self.controller);
        }
        alive
    }

    async fn restart(&self, action: RecoveryAction, attempt: u32) -> Result<(), String> {
        let mut control = self.control.lock().await;

        let state = control.machine.current_state();
        if !matches!(state, SupervisorState::Running | SupervisorState::Recovering) {
            return Err(format!("not restarting while {}", state));
        }
        let Some(config) = control.config.clone() else {
            return Err("no configuration".to_string());
        };
        if control.session.is_none() {
            return Err("no session to restart".to_string());
        }

        self.advance(
            &mut control,
            SupervisorState::Recovering,
            format!("{} attempt {}", action, attempt),
        );
        {
            let mut status = self.status.write();
            status.restart_attempts = attempt;
            status.last_recovery_action = Some(action);
        }

        let full_cycle = action == RecoveryAction::RestartService;

        if full_cycle {
            if let Some(report) = self.run_hook(&config, HookKind::PreStop).await {
                self.log_unresolved(&report);
            }
        }

        let exit_code = match control.session.as_mut() {
            Some(session) => {
                session
                    .terminate_tree(&self.controller, config.stop_timeout)
                    .await
            }
            None => None,
        };
        self.record_exit(exit_code);

        if full_cycle {
            if let Some(report) = self.run_hook(&config, HookKind::PostStop).await {
                self.log_unresolved(&report);
            }
            if let Some(report) = self.run_hook(&config, HookKind::PreLaunch).await {
                if !report.may_proceed() {
                    self.persist_status(&control).await;
                    return Err(format!("pre-launch hook failed: {}", report.outcome));
                }
            }
        }

        self.advance(&mut control, SupervisorState::Launching, format!("relaunch attempt {}", attempt));

        let launched = match self.controller.launch(&config.launch_spec(), &config.service_name) {
            Ok(launched) => launched,
            Err(e) => {
                self.advance(&mut control, SupervisorState::Recovering, "relaunch failed");
                self.persist_status(&control).await;
                return Err(e.to_string());
            }
        };

        let handle = match control.session.as_mut() {
            Some(session) => session.attach(launched),
            None => return Err("session already torn down".to_string()),
        };
        self.status.write().process = Some(handle.clone());

        self.advance(
            &mut control,
            SupervisorState::Running,
            format!("restarted as PID {}", handle.pid()),
        );
        self.persist_status(&control).await;
        info!(
            "Service {} restarted (PID: {}, attempt {})",
            self.service_name,
            handle.pid(),
            attempt
        );

        if full_cycle {
            if let Some(report) = self.run_hook(&config, HookKind::PostLaunch).await {
                self.log_unresolved(&report);
            }
        }

        Ok(())
    }

    async fn fail_session(&self, action: RecoveryAction, reason: String) {
        let mut control = self.control.lock().await;

        let state = control.machine.current_state();
        if !matches!(state, SupervisorState::Running | SupervisorState::Recovering) {
            debug!(
                "Ignoring recovery exhaustion for {} while {}",
                self.service_name, state
            );
            return;
        }

        self.advance(&mut control, SupervisorState::Recovering, reason.clone());
        self.status.write().last_recovery_action = Some(action);

        let config = control.config.clone();
        if let Some(failure) = config.as_ref().and_then(|c| c.failure_program.as_ref()) {
            let runner = HookRunner::new(self.service_name.clone());
            match runner.launch_detached(&failure.to_spec()) {
                Ok(detached) => info!(
                    "Failure program for {} started (PID: {:?})",
                    self.service_name, detached.pid
                ),
                Err(e) => warn!("Failed to run failure program for {}: {}", self.service_name, e),
            }
        }

        if let Some(mut session) = control.session.take() {
            // Called from the monitor task itself; its loop ends after this
            if let Some(monitor) = session.monitor.take() {
                monitor.cancel();
            }
            let timeout = session.config().stop_timeout;
            let exit_code = session.terminate_tree(&self.controller, timeout).await;
            session.close_capture().await;
            self.record_exit(exit_code);
        }

        self.advance(&mut control, SupervisorState::Failed, reason.clone());
        self.persist_status(&control).await;
        error!("Service {} failed: {}", self.service_name, reason);
    }
}

/// The monitor's view of the supervisor. Weak, so a monitor task never
/// keeps a dropped supervisor alive.
struct SessionProbe {
    inner: Weak<Inner>,
}

#[async_trait]
impl RecoveryTarget for SessionProbe {
    async fn is_alive(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.heartbeat().await,
            None => false,
        }
    }

    async fn restart(&self, action: RecoveryAction, attempt: u32) -> Result<(), String> {
        match self.inner.upgrade() {
            Some(inner) => inner.restart(action, attempt).await,
            None => Err("supervisor dropped".to_string()),
        }
    }

    async fn exhausted(&self, action: RecoveryAction, reason: String) {
        if let Some(inner) = self.inner.upgrade() {
            inner.fail_session(action, reason).await;
        }
    }
}
