//! Health Monitor - heartbeat loop with restart budget
//!
//! A background task ticks every heartbeat interval, asks the
//! [`RecoveryTarget`] whether the main process is alive, feeds the answer to
//! a [`FailureTracker`] and acts on the verdict.
//!
//! Restarts run inline in the loop, so a tick that comes due while a restart
//! is in flight is skipped rather than queued.

use crate::{FailureTracker, HealthCounters, HeartbeatVerdict, MonitorPolicy};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_common::RecoveryAction;

/// Shortest heartbeat period the loop will run with.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// The session the monitor watches and repairs.
#[async_trait]
pub trait RecoveryTarget: Send + Sync {
    /// Heartbeat: is the main process still running?
    async fn is_alive(&self) -> bool;

    /// Terminate the tree and relaunch. `attempt` is 1-based.
    async fn restart(&self, action: RecoveryAction, attempt: u32) -> Result<(), String>;

    /// The restart budget is spent, or the policy does not restart.
    ///
    /// Called at most once; the loop ends right after. Implementations must
    /// not wait for the monitor to stop from inside this call.
    async fn exhausted(&self, action: RecoveryAction, reason: String);
}

/// Health monitor - runs heartbeat checks in the background
pub struct HealthMonitor {
    service_name: String,
    policy: MonitorPolicy,
    tracker: Arc<RwLock<FailureTracker>>,
    cancel_token: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("service_name", &self.service_name)
            .field("policy", &self.policy)
            .field("running", &self.is_running())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(service_name: impl Into<String>, policy: MonitorPolicy) -> Self {
        Self {
            service_name: service_name.into(),
            policy,
            tracker: Arc::new(RwLock::new(FailureTracker::new(policy))),
            cancel_token: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Start the heartbeat loop. The first check runs one interval from now.
    pub fn start(&mut self, target: Arc<dyn RecoveryTarget>) {
        if self.task_handle.is_some() {
            warn!("Health monitor already started for {}", self.service_name);
            return;
        }

        let task = tokio::spawn(run_heartbeat_loop(
            self.service_name.clone(),
            self.policy,
            Arc::clone(&self.tracker),
            target,
            self.cancel_token.clone(),
        ));

        self.task_handle = Some(task);
        info!(
            "Health monitor started for {} (interval: {:?}, max_failed_checks: {}, max_restart_attempts: {}, action: {})",
            self.service_name,
            self.policy.interval,
            self.policy.max_failed_checks,
            self.policy.max_restart_attempts,
            self.policy.recovery_action
        );
    }

    /// Stop the loop and wait for it to finish.
    ///
    /// An in-flight restart completes first; no new one starts afterwards.
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.task_handle.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("Health monitor task for {} ended abnormally: {}", self.service_name, e);
                }
            }
            debug!("Health monitor stopped for {}", self.service_name);
        }
    }

    /// Signal the loop to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    pub fn counters(&self) -> HealthCounters {
        self.tracker.read().counters().clone()
    }

    pub fn policy(&self) -> &MonitorPolicy {
        &self.policy
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn run_heartbeat_loop(
    service_name: String,
    policy: MonitorPolicy,
    tracker: Arc<RwLock<FailureTracker>>,
    target: Arc<dyn RecoveryTarget>,
    cancel_token: CancellationToken,
) {
    let period = if policy.interval < MIN_INTERVAL {
        warn!(
            "Heartbeat interval {:?} for {} is too short, using {:?}",
            policy.interval, service_name, MIN_INTERVAL
        );
        MIN_INTERVAL
    } else {
        policy.interval
    };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        // Cancellation wins over a tick that came due during a restart
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let alive = target.is_alive().await;
        if cancel_token.is_cancelled() {
            break;
        }

        let (verdict, counters) = {
            let mut tracker = tracker.write();
            let verdict = tracker.record(alive);
            (verdict, tracker.counters().clone())
        };

        match verdict {
            HeartbeatVerdict::Healthy => {
                debug!("Heartbeat ok for {}", service_name);
            }
            HeartbeatVerdict::Failing { consecutive } => {
                warn!(
                    "Heartbeat failed for {}: consecutive failures = {}/{}",
                    service_name, consecutive, policy.max_failed_checks
                );
            }
            HeartbeatVerdict::ThresholdLogged => {
                warn!(
                    "Main process of {} is down; recovery action is none, leaving it",
                    service_name
                );
            }
            HeartbeatVerdict::Restart { attempt } => {
                warn!(
                    "Failure threshold reached for {}; restart attempt {}/{} ({})",
                    service_name, attempt, policy.max_restart_attempts, policy.recovery_action
                );
                match target.restart(policy.recovery_action, attempt).await {
                    Ok(()) => info!("Restart attempt {} succeeded for {}", attempt, service_name),
                    Err(e) => error!("Restart attempt {} failed for {}: {}", attempt, service_name, e),
                }
            }
            HeartbeatVerdict::Exhausted => {
                let reason = match policy.recovery_action {
                    RecoveryAction::RunFailureProgram => format!(
                        "{} consecutive failed heartbeats",
                        policy.max_failed_checks
                    ),
                    _ => format!(
                        "restart budget exhausted after {} attempt(s)",
                        counters.restart_attempts
                    ),
                };
                error!("Giving up on {}: {}", service_name, reason);
                target.exhausted(policy.recovery_action, reason).await;
                break;
            }
        }
    }

    debug!("Heartbeat loop finished for {}", service_name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted heartbeats; dead once the script runs out.
    struct ScriptedTarget {
        beats: Mutex<VecDeque<bool>>,
        checks: Mutex<u32>,
        restarts: Mutex<Vec<(RecoveryAction, u32)>>,
        exhausted: Mutex<Vec<String>>,
        fail_restart: bool,
    }

    impl ScriptedTarget {
        fn new(beats: &[bool]) -> Arc<Self> {
            Self::build(beats, false)
        }

        fn build(beats: &[bool], fail_restart: bool) -> Arc<Self> {
            Arc::new(Self {
                beats: Mutex::new(beats.iter().copied().collect()),
                checks: Mutex::new(0),
                restarts: Mutex::new(Vec::new()),
                exhausted: Mutex::new(Vec::new()),
                fail_restart,
            })
        }

        fn restart_attempts(&self) -> Vec<u32> {
            self.restarts.lock().iter().map(|(_, a)| *a).collect()
        }
    }

    #[async_trait]
    impl RecoveryTarget for ScriptedTarget {
        async fn is_alive(&self) -> bool {
            *self.checks.lock() += 1;
            self.beats.lock().pop_front().unwrap_or(false)
        }

        async fn restart(&self, action: RecoveryAction, attempt: u32) -> Result<(), String> {
            self.restarts.lock().push((action, attempt));
            if self.fail_restart {
                Err("relaunch failed".to_string())
            } else {
                Ok(())
            }
        }

        async fn exhausted(&self, _action: RecoveryAction, reason: String) {
            self.exhausted.lock().push(reason);
        }
    }

    fn policy(k: u32, max_restarts: u32, action: RecoveryAction) -> MonitorPolicy {
        MonitorPolicy {
            interval: Duration::from_secs(1),
            max_failed_checks: k,
            max_restart_attempts: max_restarts,
            recovery_action: action,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_after_one_interval() {
        let target = ScriptedTarget::new(&[true; 10]);
        let mut monitor = HealthMonitor::new("svc", policy(3, 1, RecoveryAction::RestartProcess));
        monitor.start(target.clone());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*target.checks.lock(), 0);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(*target.checks.lock(), 1);

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_success_gives_one_restart() {
        let target = ScriptedTarget::new(&[false, false, true, false, false, false, true, true, true]);
        let mut monitor = HealthMonitor::new("svc", policy(3, 5, RecoveryAction::RestartProcess));
        monitor.start(target.clone());

        tokio::time::sleep(Duration::from_millis(9500)).await;
        monitor.stop().await;

        assert_eq!(target.restart_attempts(), vec![1]);
        assert!(target.exhausted.lock().is_empty());
        assert_eq!(monitor.counters().restart_attempts, 1);
        assert_eq!(monitor.counters().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_stops_loop() {
        let target = ScriptedTarget::new(&[]);
        let mut monitor = HealthMonitor::new("svc", policy(1, 2, RecoveryAction::RestartService));
        monitor.start(target.clone());

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(target.restart_attempts(), vec![1, 2]);
        assert_eq!(target.exhausted.lock().len(), 1);
        assert_eq!(*target.checks.lock(), 3);
        assert!(!monitor.is_running());
        assert_eq!(
            target.restarts.lock()[0].0,
            RecoveryAction::RestartService
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_relaunch_still_consumes_budget() {
        let target = ScriptedTarget::build(&[], true);
        let mut monitor = HealthMonitor::new("svc", policy(2, 1, RecoveryAction::RestartProcess));
        monitor.start(target.clone());

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(target.restart_attempts(), vec![1]);
        assert_eq!(target.exhausted.lock().len(), 1);
        assert_eq!(*target.checks.lock(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_none_action_never_exhausts() {
        let target = ScriptedTarget::new(&[]);
        let mut monitor = HealthMonitor::new("svc", policy(2, 1, RecoveryAction::None));
        monitor.start(target.clone());

        tokio::time::sleep(Duration::from_millis(10500)).await;
        assert!(monitor.is_running());
        monitor.stop().await;

        assert!(target.restarts.lock().is_empty());
        assert!(target.exhausted.lock().is_empty());
        assert_eq!(*target.checks.lock(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_program_action() {
        let target = ScriptedTarget::new(&[true]);
        let mut monitor = HealthMonitor::new("svc", policy(2, 3, RecoveryAction::RunFailureProgram));
        monitor.start(target.clone());

        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert!(target.restarts.lock().is_empty());
        let reasons = target.exhausted.lock().clone();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("consecutive failed heartbeats"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_checks() {
        let target = ScriptedTarget::new(&[true; 100]);
        let mut monitor = HealthMonitor::new("svc", policy(3, 1, RecoveryAction::RestartProcess));
        monitor.start(target.clone());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        monitor.stop().await;
        let checks = *target.checks.lock();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*target.checks.lock(), checks);
        assert!(!monitor.is_running());
    }

    /// A restart that outlasts several intervals must not queue extra checks.
    struct SlowRestartTarget {
        checks: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl RecoveryTarget for SlowRestartTarget {
        async fn is_alive(&self) -> bool {
            self.checks.lock().push(Instant::now());
            false
        }

        async fn restart(&self, _action: RecoveryAction, _attempt: u32) -> Result<(), String> {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            Ok(())
        }

        async fn exhausted(&self, _action: RecoveryAction, _reason: String) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_during_restart_are_coalesced() {
        let target = Arc::new(SlowRestartTarget {
            checks: Mutex::new(Vec::new()),
        });
        let start = Instant::now();
        let mut monitor = HealthMonitor::new("svc", policy(1, 5, RecoveryAction::RestartProcess));
        monitor.start(target.clone());

        // Check at 1s starts a restart that runs until 4.5s
        tokio::time::sleep(Duration::from_millis(5200)).await;
        monitor.stop().await;

        let checks = target.checks.lock().clone();
        assert_eq!(checks.len(), 2);
        // The missed ticks at 2s, 3s and 4s collapsed into one after the restart
        assert!(checks[1] - start >= Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_check_after_cancel_during_restart() {
        let target = Arc::new(SlowRestartTarget {
            checks: Mutex::new(Vec::new()),
        });
        let mut monitor = HealthMonitor::new("svc", policy(1, 5, RecoveryAction::RestartProcess));
        monitor.start(target.clone());

        // Restart in flight from 1s to 4.5s; the tick is overdue when it returns
        tokio::time::sleep(Duration::from_millis(2000)).await;
        monitor.stop().await;

        assert_eq!(target.checks.lock().len(), 1);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let target = ScriptedTarget::new(&[true; 1000]);
        let mut monitor = HealthMonitor::new(
            "svc",
            MonitorPolicy {
                interval: Duration::ZERO,
                ..policy(3, 1, RecoveryAction::RestartProcess)
            },
        );
        monitor.start(target.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(monitor.is_running());
        assert!(*target.checks.lock() > 0);

        monitor.stop().await;
        assert!(target.restarts.lock().is_empty());
    }
}
