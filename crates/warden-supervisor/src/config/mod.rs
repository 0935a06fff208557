//! Supervisor configuration, loaded from YAML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden_common::{HookKind, ProcessPriority, RecoveryAction};
use warden_hooks::HookSpec;
use warden_log_collection::{CaptureConfig, RotationSettings};
use warden_monitoring::MonitorPolicy;
use warden_process::LaunchSpec;

pub mod validation;

/// Everything one supervised service needs. Immutable for the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub service_name: String,
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub priority: ProcessPriority,
    /// Overrides applied on top of the inherited environment, in order.
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_program: Option<FailureProgramConfig>,
    /// Graceful wait per process before a force kill.
    #[serde(default = "default_stop_timeout", with = "duration_serde")]
    pub stop_timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Size-based rotation of the captured output files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_true")]
    pub enable_rotation: bool,
    #[serde(default = "default_rotation_size_bytes")]
    pub rotation_size_bytes: u64,
    /// 0 keeps every rotated file.
    #[serde(default = "default_max_rotations")]
    pub max_rotations: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enable_rotation: true,
            rotation_size_bytes: default_rotation_size_bytes(),
            max_rotations: default_max_rotations(),
        }
    }
}

/// Heartbeat monitoring and recovery policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub enable_health_monitoring: bool,
    #[serde(default = "default_heartbeat_interval", with = "duration_serde")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_max_failed_checks")]
    pub max_failed_checks: u32,
    #[serde(default = "default_recovery_action")]
    pub recovery_action: RecoveryAction,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enable_health_monitoring: false,
            heartbeat_interval: default_heartbeat_interval(),
            max_failed_checks: default_max_failed_checks(),
            recovery_action: default_recovery_action(),
            max_restart_attempts: default_max_restart_attempts(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_launch: Option<HookConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_launch: Option<HookConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_stop: Option<HookConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_stop: Option<HookConfig>,
}

/// One lifecycle hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default = "default_hook_timeout", with = "duration_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default)]
    pub ignore_failure: bool,
}

impl HookConfig {
    pub fn to_spec(&self) -> HookSpec {
        HookSpec {
            path: self.path.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            env: env_pairs(&self.env),
            timeout: self.timeout,
            retry_attempts: self.retry_attempts,
            ignore_failure: self.ignore_failure,
        }
    }
}

/// Program run once when recovery gives up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureProgramConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// How long the reaper waits before killing it.
    #[serde(default = "default_hook_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl FailureProgramConfig {
    pub fn to_spec(&self) -> HookSpec {
        HookSpec {
            path: self.path.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            env: Vec::new(),
            timeout: self.timeout,
            retry_attempts: 0,
            ignore_failure: true,
        }
    }
}

impl SupervisorConfig {
    /// Minimal configuration for `executable`; everything else defaulted.
    pub fn new(service_name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            service_name: service_name.into(),
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            priority: ProcessPriority::default(),
            env: Vec::new(),
            stdout_path: None,
            stderr_path: None,
            rotation: RotationConfig::default(),
            health: HealthConfig::default(),
            hooks: HooksConfig::default(),
            failure_program: None,
            stop_timeout: default_stop_timeout(),
            status_file: None,
        }
    }

    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: SupervisorConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    pub fn hook(&self, kind: HookKind) -> Option<&HookConfig> {
        match kind {
            HookKind::PreLaunch => self.hooks.pre_launch.as_ref(),
            HookKind::PostLaunch => self.hooks.post_launch.as_ref(),
            HookKind::PreStop => self.hooks.pre_stop.as_ref(),
            HookKind::PostStop => self.hooks.post_stop.as_ref(),
            HookKind::FailureProgram => None,
        }
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            executable: self.executable.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            env: env_pairs(&self.env),
            priority: self.priority,
            capture_stdout: self.stdout_path.is_some(),
            capture_stderr: self.stderr_path.is_some(),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            stdout_path: self.stdout_path.clone(),
            stderr_path: self.stderr_path.clone(),
            rotation: RotationSettings {
                enabled: self.rotation.enable_rotation,
                size_bytes: self.rotation.rotation_size_bytes,
                max_rotations: self.rotation.max_rotations,
            },
        }
    }

    pub fn monitor_policy(&self) -> MonitorPolicy {
        MonitorPolicy {
            interval: self.health.heartbeat_interval,
            max_failed_checks: self.health.max_failed_checks,
            max_restart_attempts: self.health.max_restart_attempts,
            recovery_action: self.health.recovery_action,
        }
    }
}

fn env_pairs(env: &[EnvVar]) -> Vec<(String, String)> {
    env.iter()
        .map(|var| (var.name.clone(), var.value.clone()))
        .collect()
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_rotation_size_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_rotations() -> u32 {
    5
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_max_failed_checks() -> u32 {
    3
}

fn default_recovery_action() -> RecoveryAction {
    RecoveryAction::RestartProcess
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_hook_timeout() -> Duration {
    Duration::from_secs(30)
}

// Custom serialization for Duration
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        if millis % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", millis))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let invalid = || format!("Invalid duration: {}", s);

        // "ms" before "s", since "ms" also ends with 's'
        if let Some(num) = s.strip_suffix("ms") {
            num.trim().parse().map(Duration::from_millis).map_err(|_| invalid())
        } else if let Some(num) = s.strip_suffix('s') {
            num.trim().parse().map(Duration::from_secs).map_err(|_| invalid())
        } else if let Some(num) = s.strip_suffix('m') {
            num.trim()
                .parse::<u64>()
                .map(|mins| Duration::from_secs(mins * 60))
                .map_err(|_| invalid())
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }
}
