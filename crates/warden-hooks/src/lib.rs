//! # Warden Hooks
//!
//! Runs auxiliary programs at lifecycle transitions: pre-launch, post-launch,
//! pre-stop, post-stop, and the failure program.
//!
//! A hook runs to completion (or its timeout) before the caller moves on.
//! Failed attempts are retried immediately, without backoff.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_common::{HookKind, LaunchError, LaunchResult};

/// What to run and how patiently.
#[derive(Debug, Clone)]
pub struct HookSpec {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Additional attempts after the first one fails.
    pub retry_attempts: u32,
    /// Treat a final failure as success for sequencing (it is still logged).
    pub ignore_failure: bool,
}

impl HookSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            timeout: Duration::from_secs(30),
            retry_attempts: 0,
            ignore_failure: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn ignoring_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }
}

/// Outcome of one hook attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResult {
    Success,
    /// Did not finish within its timeout and was killed.
    Timeout,
    /// Exit code, `None` when terminated by a signal.
    NonZeroExit(Option<i32>),
    SpawnFailed(String),
}

impl HookResult {
    pub fn is_success(&self) -> bool {
        matches!(self, HookResult::Success)
    }
}

impl fmt::Display for HookResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookResult::Success => write!(f, "success"),
            HookResult::Timeout => write!(f, "timed out"),
            HookResult::NonZeroExit(Some(code)) => write!(f, "exit code {}", code),
            HookResult::NonZeroExit(None) => write!(f, "terminated by signal"),
            HookResult::SpawnFailed(reason) => write!(f, "spawn failed: {}", reason),
        }
    }
}

/// Final outcome of a hook after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReport {
    pub kind: HookKind,
    pub outcome: HookResult,
    pub attempts: u32,
    pub ignore_failure: bool,
}

impl HookReport {
    /// Whether the lifecycle may proceed past this hook.
    pub fn may_proceed(&self) -> bool {
        self.outcome.is_success() || self.ignore_failure
    }
}

/// A failure program left running in the background.
#[derive(Debug)]
pub struct DetachedHook {
    pub pid: Option<u32>,
    /// Resolves once the program exits or is killed at its timeout.
    pub reaper: JoinHandle<HookResult>,
}

/// Runs hooks on behalf of one service.
#[derive(Debug, Clone)]
pub struct HookRunner {
    service_name: String,
}

impl HookRunner {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Run `spec` to completion, retrying on any non-success outcome.
    pub async fn run(&self, kind: HookKind, spec: &HookSpec) -> HookReport {
        let max_attempts = spec.retry_attempts.saturating_add(1);
        let mut attempts = 0;
        let mut outcome = HookResult::SpawnFailed("not attempted".to_string());

        while attempts < max_attempts {
            attempts += 1;
            debug!(
                "Running {} hook for {} (attempt {}/{}): {}",
                kind,
                self.service_name,
                attempts,
                max_attempts,
                spec.path.display()
            );

            outcome = self.run_once(kind, spec).await;
            if outcome.is_success() {
                break;
            }

            warn!(
                "{} hook for {} failed on attempt {}/{}: {}",
                kind, self.service_name, attempts, max_attempts, outcome
            );
        }

        let report = HookReport {
            kind,
            outcome,
            attempts,
            ignore_failure: spec.ignore_failure,
        };

        if report.outcome.is_success() {
            info!("{} hook for {} completed", kind, self.service_name);
        } else if report.ignore_failure {
            warn!(
                "{} hook for {} failed ({}); ignoring as configured",
                kind, self.service_name, report.outcome
            );
        }

        report
    }

    async fn run_once(&self, kind: HookKind, spec: &HookSpec) -> HookResult {
        let mut child = match self.spawn(kind, spec) {
            Ok(child) => child,
            Err(e) => return HookResult::SpawnFailed(e.to_string()),
        };

        match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => HookResult::Success,
            Ok(Ok(status)) => HookResult::NonZeroExit(status.code()),
            Ok(Err(e)) => HookResult::SpawnFailed(format!("wait failed: {}", e)),
            Err(_) => {
                warn!(
                    "{} hook for {} exceeded {:?}, killing",
                    kind, self.service_name, spec.timeout
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed-out {} hook: {}", kind, e);
                }
                HookResult::Timeout
            }
        }
    }

    /// Start the failure program without waiting for it.
    ///
    /// A reaper task waits up to `spec.timeout`, logs the outcome and kills the
    /// program if it is still running.
    pub fn launch_detached(&self, spec: &HookSpec) -> LaunchResult<DetachedHook> {
        let kind = HookKind::FailureProgram;
        let mut child = self
            .spawn(kind, spec)
            .map_err(|e| LaunchError::from_io(&spec.path, &e))?;
        let pid = child.id();
        let service_name = self.service_name.clone();
        let timeout = spec.timeout;

        info!(
            "Started {} for {} (PID: {:?})",
            kind, service_name, pid
        );

        let reaper = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) if status.success() => HookResult::Success,
                Ok(Ok(status)) => HookResult::NonZeroExit(status.code()),
                Ok(Err(e)) => HookResult::SpawnFailed(format!("wait failed: {}", e)),
                Err(_) => {
                    let _ = child.kill().await;
                    HookResult::Timeout
                }
            };

            if outcome.is_success() {
                info!("{} for {} finished", kind, service_name);
            } else {
                warn!("{} for {} finished: {}", kind, service_name, outcome);
            }
            outcome
        });

        Ok(DetachedHook { pid, reaper })
    }

    fn spawn(&self, kind: HookKind, spec: &HookSpec) -> std::io::Result<Child> {
        let mut cmd = Command::new(&spec.path);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref wd) = spec.working_dir {
            cmd.current_dir(wd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, self.service_name.clone(), kind, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, self.service_name.clone(), kind, "stderr");
        }

        Ok(child)
    }
}

/// Pipe hook output into the debug log line by line.
fn forward_output<R>(stream: R, service: String, kind: HookKind, stream_name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(
                    service = %service,
                    hook = %kind,
                    stream = stream_name,
                    "{}",
                    line
                ),
                Ok(None) => break,
                Err(e) => {
                    debug!("Stopped reading {} {} output: {}", kind, stream_name, e);
                    break;
                }
            }
        }
    });
}
