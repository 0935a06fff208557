//! # Warden State
//!
//! Lifecycle states of a supervised service and the machine that guards
//! transitions between them.
//!
//! ```text
//! Idle -> PreLaunching -> Launching -> Running -> Stopping -> PostStopping -> Stopped
//!                                        |
//!                                        +-> Recovering -> Launching | Failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use warden_common::{SupervisorError, SupervisorResult};

const MAX_HISTORY: usize = 100;

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    /// No session has been started yet
    Idle,
    /// Pre-launch hook is running
    PreLaunching,
    /// Main process is being spawned
    Launching,
    /// Main process is running under supervision
    Running,
    /// Health monitor triggered a recovery action
    Recovering,
    /// Pre-stop hook and tree termination in progress
    Stopping,
    /// Post-stop hook is running
    PostStopping,
    /// Session ended by a stop request
    Stopped,
    /// Session ended by an unrecoverable failure
    Failed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::PreLaunching => write!(f, "pre_launching"),
            SupervisorState::Launching => write!(f, "launching"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Recovering => write!(f, "recovering"),
            SupervisorState::Stopping => write!(f, "stopping"),
            SupervisorState::PostStopping => write!(f, "post_stopping"),
            SupervisorState::Stopped => write!(f, "stopped"),
            SupervisorState::Failed => write!(f, "failed"),
        }
    }
}

impl SupervisorState {
    /// Session has ended (or never began) and a new one may start.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SupervisorState::Idle | SupervisorState::Stopped | SupervisorState::Failed
        )
    }

    /// A start or recovery sequence is in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            SupervisorState::PreLaunching
                | SupervisorState::Launching
                | SupervisorState::Recovering
                | SupervisorState::Stopping
                | SupervisorState::PostStopping
        )
    }

    /// A session currently owns (or is acquiring) a main process.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// Recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: SupervisorState,
    pub to_state: SupervisorState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Guards supervisor state changes and keeps a bounded history of them.
#[derive(Debug, Clone)]
pub struct SupervisorStateMachine {
    service_name: String,
    current_state: SupervisorState,
    previous_state: Option<SupervisorState>,
    state_history: Vec<StateTransition>,
    last_transition_time: DateTime<Utc>,
}

impl SupervisorStateMachine {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            current_state: SupervisorState::Idle,
            previous_state: None,
            state_history: Vec::new(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn current_state(&self) -> SupervisorState {
        self.current_state
    }

    pub fn previous_state(&self) -> Option<SupervisorState> {
        self.previous_state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.state_history
    }

    pub fn last_transition_time(&self) -> DateTime<Utc> {
        self.last_transition_time
    }

    /// Check if a transition from the current state to `target` is valid.
    pub fn is_valid_transition(&self, target: SupervisorState) -> bool {
        use SupervisorState::*;

        match (self.current_state, target) {
            // New session
            (Idle | Stopped | Failed, PreLaunching) => true,

            // Start sequence
            (PreLaunching, Launching) => true,
            (PreLaunching, Failed) => true,
            (Launching, Running) => true,
            (Launching, Failed) => true,
            // Relaunch failed during recovery; the monitor keeps trying
            (Launching, Recovering) => true,

            // Running
            (Running, Stopping) => true,
            (Running, Recovering) => true,

            // Recovery
            (Recovering, Launching) => true,
            (Recovering, Failed) => true,
            (Recovering, Stopping) => true,

            // Stop sequence
            (Stopping, PostStopping) => true,
            (PostStopping, Stopped) => true,
            (Failed, Stopping) => true,

            // Same state (no-op)
            (state, target) if state == target => true,

            _ => false,
        }
    }

    /// Transition to a new state with an optional reason.
    pub fn transition_to(
        &mut self,
        target: SupervisorState,
        reason: Option<String>,
    ) -> SupervisorResult<()> {
        if !self.is_valid_transition(target) {
            return Err(SupervisorError::invalid_state(
                &self.service_name,
                format!("a state that can move to {}", target),
                self.current_state.to_string(),
            ));
        }

        self.apply(target, reason);
        Ok(())
    }

    /// Transition even if the edge is not part of the normal graph.
    ///
    /// Used on the stop path, which must always reach `Stopped`.
    pub fn force_transition(&mut self, target: SupervisorState, reason: Option<String>) {
        if !self.is_valid_transition(target) {
            tracing::warn!(
                "Forcing {} from {} to {} outside the normal lifecycle",
                self.service_name,
                self.current_state,
                target
            );
        }
        self.apply(target, reason);
    }

    fn apply(&mut self, target: SupervisorState, reason: Option<String>) {
        if self.current_state == target {
            return;
        }

        let now = Utc::now();
        let from = self.current_state;
        self.state_history.push(StateTransition {
            from_state: from,
            to_state: target,
            timestamp: now,
            reason,
        });
        if self.state_history.len() > MAX_HISTORY {
            self.state_history.remove(0);
        }

        self.previous_state = Some(from);
        self.current_state = target;
        self.last_transition_time = now;

        tracing::debug!("Service {} transitioned from {} to {}", self.service_name, from, target);
    }

    /// A new session may be started.
    pub fn can_start(&self) -> bool {
        self.current_state.is_terminal()
    }

    /// A stop request has something to tear down.
    pub fn can_stop(&self) -> bool {
        !matches!(self.current_state, SupervisorState::Idle | SupervisorState::Stopped)
    }

    /// Count transitions into a specific state.
    pub fn count_transitions_to(&self, state: SupervisorState) -> usize {
        self.state_history
            .iter()
            .filter(|t| t.to_state == state)
            .count()
    }

    pub fn time_in_current_state(&self) -> chrono::Duration {
        Utc::now() - self.last_transition_time
    }
}
