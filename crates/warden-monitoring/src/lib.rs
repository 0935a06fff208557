//! # Warden Monitoring
//!
//! Heartbeat-driven health monitoring for the supervised main process.
//!
//! [`FailureTracker`] holds the counting policy and is free of timers;
//! [`HealthMonitor`] drives it from a tokio interval and calls back into a
//! [`RecoveryTarget`] when a restart or terminal failure is due.

pub mod health_monitor;

pub use health_monitor::{HealthMonitor, RecoveryTarget};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use warden_common::RecoveryAction;

/// Heartbeat and recovery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorPolicy {
    pub interval: Duration,
    /// Consecutive failed heartbeats that make a qualifying failure run.
    pub max_failed_checks: u32,
    /// Restarts allowed over the whole session.
    pub max_restart_attempts: u32,
    pub recovery_action: RecoveryAction,
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_failed_checks: 3,
            max_restart_attempts: 3,
            recovery_action: RecoveryAction::RestartProcess,
        }
    }
}

/// Counters visible to status queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounters {
    pub consecutive_failures: u32,
    /// Restarts performed this session. Never reset, never above the budget.
    pub restart_attempts: u32,
    pub total_checks: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

/// What a single heartbeat result means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    Healthy,
    /// Failed, but the run is still below the threshold.
    Failing { consecutive: u32 },
    /// Threshold crossed under `RecoveryAction::None`; logged only.
    ThresholdLogged,
    /// Restart now; `attempt` is 1-based.
    Restart { attempt: u32 },
    /// Budget spent (or the policy never restarts); the session must fail.
    Exhausted,
}

/// Counts heartbeat outcomes and decides when to restart or give up.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    policy: MonitorPolicy,
    counters: HealthCounters,
}

impl FailureTracker {
    pub fn new(policy: MonitorPolicy) -> Self {
        Self {
            policy,
            counters: HealthCounters::default(),
        }
    }

    pub fn policy(&self) -> &MonitorPolicy {
        &self.policy
    }

    pub fn counters(&self) -> &HealthCounters {
        &self.counters
    }

    /// Record one heartbeat.
    pub fn record(&mut self, alive: bool) -> HeartbeatVerdict {
        let now = Utc::now();
        self.counters.total_checks += 1;
        self.counters.last_check = Some(now);

        if alive {
            self.counters.consecutive_failures = 0;
            self.counters.last_success = Some(now);
            return HeartbeatVerdict::Healthy;
        }

        self.counters.consecutive_failures += 1;
        let threshold = self.policy.max_failed_checks.max(1);
        if self.counters.consecutive_failures < threshold {
            return HeartbeatVerdict::Failing {
                consecutive: self.counters.consecutive_failures,
            };
        }

        match self.policy.recovery_action {
            RecoveryAction::None => {
                warn!(
                    "Failure threshold ({}) crossed; recovery action is none",
                    threshold
                );
                self.counters.consecutive_failures = 0;
                HeartbeatVerdict::ThresholdLogged
            }
            RecoveryAction::RunFailureProgram => HeartbeatVerdict::Exhausted,
            RecoveryAction::RestartProcess | RecoveryAction::RestartService => {
                if self.counters.restart_attempts >= self.policy.max_restart_attempts {
                    return HeartbeatVerdict::Exhausted;
                }
                self.counters.restart_attempts += 1;
                self.counters.consecutive_failures = 0;
                HeartbeatVerdict::Restart {
                    attempt: self.counters.restart_attempts,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(k: u32, max_restarts: u32, action: RecoveryAction) -> FailureTracker {
        FailureTracker::new(MonitorPolicy {
            interval: Duration::from_secs(1),
            max_failed_checks: k,
            max_restart_attempts: max_restarts,
            recovery_action: action,
        })
    }

    fn feed(tracker: &mut FailureTracker, beats: &[bool]) -> Vec<HeartbeatVerdict> {
        beats.iter().map(|alive| tracker.record(*alive)).collect()
    }

    #[test]
    fn test_interleaved_success_resets_run() {
        let mut t = tracker(3, 5, RecoveryAction::RestartProcess);
        let verdicts = feed(&mut t, &[false, false, true, false, false, false]);

        let restarts: Vec<_> = verdicts
            .iter()
            .filter(|v| matches!(v, HeartbeatVerdict::Restart { .. }))
            .collect();
        assert_eq!(restarts.len(), 1);
        assert_eq!(verdicts[5], HeartbeatVerdict::Restart { attempt: 1 });
        assert_eq!(verdicts[2], HeartbeatVerdict::Healthy);
        assert_eq!(t.counters().consecutive_failures, 0);
    }

    #[test]
    fn test_exactly_k_failures_before_restart() {
        let mut t = tracker(4, 1, RecoveryAction::RestartProcess);
        let verdicts = feed(&mut t, &[false, false, false]);
        assert!(verdicts
            .iter()
            .all(|v| matches!(v, HeartbeatVerdict::Failing { .. })));
        assert_eq!(t.counters().restart_attempts, 0);

        assert_eq!(t.record(false), HeartbeatVerdict::Restart { attempt: 1 });
    }

    #[test]
    fn test_budget_permits_exactly_max_restarts() {
        let mut t = tracker(1, 2, RecoveryAction::RestartService);
        assert_eq!(t.record(false), HeartbeatVerdict::Restart { attempt: 1 });
        assert_eq!(t.record(false), HeartbeatVerdict::Restart { attempt: 2 });
        assert_eq!(t.record(false), HeartbeatVerdict::Exhausted);
        assert_eq!(t.counters().restart_attempts, 2);
    }

    #[test]
    fn test_restart_budget_is_session_lifetime() {
        let mut t = tracker(2, 1, RecoveryAction::RestartProcess);
        feed(&mut t, &[false, false]);
        // Healthy for a while after the restart
        feed(&mut t, &[true, true, true]);
        assert_eq!(t.counters().restart_attempts, 1);

        assert_eq!(t.record(false), HeartbeatVerdict::Failing { consecutive: 1 });
        assert_eq!(t.record(false), HeartbeatVerdict::Exhausted);
    }

    #[test]
    fn test_zero_budget_fails_on_first_run() {
        let mut t = tracker(2, 0, RecoveryAction::RestartProcess);
        t.record(false);
        assert_eq!(t.record(false), HeartbeatVerdict::Exhausted);
    }

    #[test]
    fn test_none_action_only_logs() {
        let mut t = tracker(2, 1, RecoveryAction::None);
        let verdicts = feed(&mut t, &[false, false, false, false, false]);

        assert_eq!(verdicts[1], HeartbeatVerdict::ThresholdLogged);
        assert_eq!(verdicts[3], HeartbeatVerdict::ThresholdLogged);
        assert!(!verdicts.contains(&HeartbeatVerdict::Exhausted));
        assert_eq!(t.counters().restart_attempts, 0);
    }

    #[test]
    fn test_failure_program_action_is_terminal_immediately() {
        let mut t = tracker(2, 5, RecoveryAction::RunFailureProgram);
        t.record(false);
        assert_eq!(t.record(false), HeartbeatVerdict::Exhausted);
        assert_eq!(t.counters().restart_attempts, 0);
    }

    #[test]
    fn test_counters_track_checks() {
        let mut t = tracker(3, 1, RecoveryAction::RestartProcess);
        feed(&mut t, &[true, false]);
        let c = t.counters();
        assert_eq!(c.total_checks, 2);
        assert_eq!(c.consecutive_failures, 1);
        assert!(c.last_success.is_some());
        assert!(c.last_check >= c.last_success);
    }
}
