//! Launching the main process and tearing down its whole tree.

use crate::handle::ProcessHandle;
use crate::introspect::{ProcessInfo, ProcessIntrospector};
use crate::signaller::{ProcessSignaller, TerminationSignal};
use crate::validation::{validate_executable, validate_working_dir};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};
use warden_common::{LaunchError, LaunchResult, ProcessPriority, TerminationWarning};

const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(3);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A root process whose table entry started this much later than recorded
/// has been replaced by an unrelated process reusing its pid.
const PID_REUSE_TOLERANCE: Duration = Duration::from_secs(1);

/// Everything needed to start the main process.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Overrides merged on top of the inherited environment, in order.
    pub env: Vec<(String, String)>,
    pub priority: ProcessPriority,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
}

/// A freshly launched process and the output pipes requested for it.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub handle: ProcessHandle,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// Starts the main process and kills it together with its descendants.
#[derive(Clone)]
pub struct ProcessTreeController {
    introspector: Arc<dyn ProcessIntrospector>,
    signaller: Arc<dyn ProcessSignaller>,
}

impl ProcessTreeController {
    pub fn new(
        introspector: Arc<dyn ProcessIntrospector>,
        signaller: Arc<dyn ProcessSignaller>,
    ) -> Self {
        Self {
            introspector,
            signaller,
        }
    }

    /// Controller wired to the real OS.
    pub fn native() -> Self {
        Self::new(
            crate::introspect::native_introspector(),
            Arc::new(crate::signaller::OsSignaller),
        )
    }

    pub fn introspector(&self) -> &Arc<dyn ProcessIntrospector> {
        &self.introspector
    }

    /// Start the process described by `spec`.
    ///
    /// Failures are classified and returned; nothing is retried here.
    pub fn launch(&self, spec: &LaunchSpec, label: &str) -> LaunchResult<LaunchedProcess> {
        validate_executable(&spec.executable)?;
        if let Some(ref wd) = spec.working_dir {
            validate_working_dir(wd)?;
        }

        info!("Launching {}: {}", label, spec.executable.display());

        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args);

        if let Some(ref wd) = spec.working_dir {
            cmd.current_dir(wd);
        }

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(if spec.capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(if spec.capture_stderr {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        // Own process group so console control events aimed at the child
        // never reach the host
        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | spec.priority.windows_priority_class());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::from_io(&spec.executable, &e))?;

        let pid = child
            .id()
            .ok_or_else(|| LaunchError::spawn_failed(&spec.executable, "process exited before its pid was read"))?;

        #[cfg(unix)]
        apply_priority(pid, spec.priority, label);

        let started_at = self
            .introspector
            .process_info(pid)
            .map(|info| info.start_time)
            .unwrap_or_else(SystemTime::now);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let handle = ProcessHandle::watch(child, label, started_at, Arc::clone(&self.signaller));

        info!("Process {} launched (PID: {})", label, pid);

        Ok(LaunchedProcess {
            handle,
            stdout,
            stderr,
        })
    }

    /// Snapshot of every live process descending from `root`.
    ///
    /// A candidate is accepted only if each link of its parent chain up to
    /// `root` started no earlier than `root` did. A process that predates the
    /// root cannot be its descendant, whatever its parent pid says.
    pub fn discover_descendants(&self, root: &ProcessHandle) -> Vec<ProcessInfo> {
        let snapshot = self.introspector.snapshot();
        collect_descendants(&snapshot, root.pid(), root.started_at())
    }

    /// Whether a previously seen process is still the same process.
    pub fn still_matches(&self, pid: u32, started_at: SystemTime) -> bool {
        self.introspector
            .process_info(pid)
            .map(|info| info.start_time == started_at)
            .unwrap_or(false)
    }

    /// Kill `root` and its descendants, children before parents.
    ///
    /// `tracked` holds descendants remembered from earlier discoveries (pid to
    /// start time); those whose identity still matches are killed even if
    /// their chain to `root` is broken. Never fails: every problem comes back
    /// as a warning for the caller to log.
    pub async fn terminate(
        &self,
        root: &ProcessHandle,
        tracked: &BTreeMap<u32, SystemTime>,
        per_process_timeout: Duration,
    ) -> Vec<TerminationWarning> {
        let mut warnings = Vec::new();

        let mut kill_set: HashMap<u32, ProcessInfo> = self
            .discover_descendants(root)
            .into_iter()
            .map(|info| (info.pid, info))
            .collect();

        for (&pid, &started_at) in tracked {
            if pid == root.pid() || kill_set.contains_key(&pid) {
                continue;
            }
            match self.introspector.process_info(pid) {
                Some(info) if info.start_time == started_at => {
                    debug!("Including tracked orphan PID {} in teardown", pid);
                    kill_set.insert(pid, info);
                }
                _ => debug!("Tracked PID {} is gone or was reused; skipping", pid),
            }
        }

        let order = kill_order(&kill_set, root.pid());
        if !order.is_empty() {
            info!(
                "Terminating {} descendant(s) of PID {}: {:?}",
                order.len(),
                root.pid(),
                order
            );
        }

        for pid in order {
            self.terminate_one(pid, None, per_process_timeout, &mut warnings)
                .await;
        }

        if root.has_exited() {
            // Reaped already; the pid may belong to someone else by now
            debug!("Main process PID {} already exited", root.pid());
        } else {
            self.terminate_one(root.pid(), Some(root), per_process_timeout, &mut warnings)
                .await;
        }

        warnings
    }

    async fn terminate_one(
        &self,
        pid: u32,
        handle: Option<&ProcessHandle>,
        timeout: Duration,
        warnings: &mut Vec<TerminationWarning>,
    ) {
        match self.send(pid, handle, TerminationSignal::Close).await {
            Ok(()) => {}
            Err(w @ TerminationWarning::AlreadyExited { .. }) => {
                warnings.push(w);
                return;
            }
            Err(w) => {
                debug!("Graceful close failed for PID {}: {}", pid, w);
                warnings.push(w);
            }
        }

        if self.wait_for_exit(pid, handle, timeout).await {
            debug!("PID {} exited after close request", pid);
            return;
        }

        warn!(
            "PID {} did not exit within {:?}, force killing",
            pid, timeout
        );

        match self.send(pid, handle, TerminationSignal::Kill).await {
            Ok(()) => {}
            Err(w @ TerminationWarning::AlreadyExited { .. }) => {
                warnings.push(w);
                return;
            }
            Err(w) => warnings.push(w),
        }

        if !self.wait_for_exit(pid, handle, FORCE_KILL_TIMEOUT).await {
            warnings.push(TerminationWarning::StillRunning { pid });
        }
    }

    /// Owned processes are signalled by their exit watcher, which knows
    /// whether the pid is still theirs; everything else goes by pid.
    async fn send(
        &self,
        pid: u32,
        handle: Option<&ProcessHandle>,
        signal: TerminationSignal,
    ) -> Result<(), TerminationWarning> {
        if let Some(handle) = handle {
            if let Some(outcome) = handle.signal(signal).await {
                return outcome;
            }
        }
        self.signaller.deliver(pid, signal)
    }

    /// Prefer the exit watcher (it reaped the child, so pid reuse cannot
    /// fool it); fall back to polling for processes we do not own.
    async fn wait_for_exit(
        &self,
        pid: u32,
        handle: Option<&ProcessHandle>,
        timeout: Duration,
    ) -> bool {
        if let Some(handle) = handle.filter(|h| h.is_owned()) {
            return handle.wait_for_exit(timeout).await;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.signaller.is_running(pid) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}

fn collect_descendants(
    snapshot: &[ProcessInfo],
    root_pid: u32,
    root_started: SystemTime,
) -> Vec<ProcessInfo> {
    let by_pid: HashMap<u32, &ProcessInfo> = snapshot.iter().map(|p| (p.pid, p)).collect();

    if let Some(current_root) = by_pid.get(&root_pid) {
        if current_root.start_time > root_started + PID_REUSE_TOLERANCE {
            debug!("PID {} now belongs to a newer process; no descendants", root_pid);
            return Vec::new();
        }
    }

    let mut verdicts: HashMap<u32, bool> = HashMap::new();
    snapshot
        .iter()
        .filter(|p| p.pid != root_pid)
        .filter(|p| descends_from(p.pid, &by_pid, root_pid, root_started, &mut verdicts))
        .copied()
        .collect()
}

fn descends_from(
    pid: u32,
    by_pid: &HashMap<u32, &ProcessInfo>,
    root_pid: u32,
    root_started: SystemTime,
    verdicts: &mut HashMap<u32, bool>,
) -> bool {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = pid;

    let verdict = loop {
        if let Some(&known) = verdicts.get(&current) {
            break known;
        }
        if !seen.insert(current) {
            break false;
        }
        let Some(info) = by_pid.get(&current) else {
            break false;
        };
        chain.push(current);
        if info.start_time < root_started {
            break false;
        }
        match info.parent_pid {
            Some(parent) if parent == root_pid => break true,
            Some(parent) => current = parent,
            None => break false,
        }
    };

    for p in chain {
        verdicts.insert(p, verdict);
    }
    verdict
}

/// Post-order over the kill set: every process comes after all of its
/// children in the set. Siblings are visited in pid order.
fn kill_order(kill_set: &HashMap<u32, ProcessInfo>, root_pid: u32) -> Vec<u32> {
    let mut children: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let mut tops = Vec::new();

    for info in kill_set.values() {
        match info.parent_pid {
            Some(parent) if parent != root_pid && kill_set.contains_key(&parent) => {
                children.entry(parent).or_default().push(info.pid)
            }
            _ => tops.push(info.pid),
        }
    }
    tops.sort_unstable();
    for list in children.values_mut() {
        list.sort_unstable();
    }

    let mut order = Vec::with_capacity(kill_set.len());
    let mut visited = HashSet::new();
    for top in tops {
        visit(top, &children, &mut visited, &mut order);
    }
    order
}

fn visit(
    pid: u32,
    children: &BTreeMap<u32, Vec<u32>>,
    visited: &mut HashSet<u32>,
    order: &mut Vec<u32>,
) {
    if !visited.insert(pid) {
        return;
    }
    if let Some(kids) = children.get(&pid) {
        for &kid in kids {
            visit(kid, children, visited, order);
        }
    }
    order.push(pid);
}

#[cfg(unix)]
fn apply_priority(pid: u32, priority: ProcessPriority, label: &str) {
    let nice = priority.nice_value();
    if nice == 0 {
        return;
    }

    // SAFETY: setpriority only reads its scalar arguments
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };
    if rc != 0 {
        warn!(
            "Failed to set priority {:?} (nice {}) on {} (PID: {}): {}",
            priority,
            nice,
            label,
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    const T0: u64 = 1_700_000_000;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(T0 + secs)
    }

    fn proc(pid: u32, parent: u32, started: u64) -> ProcessInfo {
        ProcessInfo {
            pid,
            parent_pid: Some(parent),
            start_time: at(started),
        }
    }

    struct FakeIntrospector {
        table: Mutex<Vec<ProcessInfo>>,
    }

    impl FakeIntrospector {
        fn new(table: Vec<ProcessInfo>) -> Arc<Self> {
            Arc::new(Self {
                table: Mutex::new(table),
            })
        }
    }

    impl ProcessIntrospector for FakeIntrospector {
        fn snapshot(&self) -> Vec<ProcessInfo> {
            self.table.lock().clone()
        }

        fn process_info(&self, pid: u32) -> Option<ProcessInfo> {
            self.table.lock().iter().find(|p| p.pid == pid).copied()
        }
    }

    /// Records every signal; processes die on close unless marked stubborn.
    struct RecordingSignaller {
        alive: Mutex<HashSet<u32>>,
        stubborn: HashSet<u32>,
        calls: Mutex<Vec<(&'static str, u32)>>,
    }

    impl RecordingSignaller {
        fn new(alive: &[u32], stubborn: &[u32]) -> Arc<Self> {
            Arc::new(Self {
                alive: Mutex::new(alive.iter().copied().collect()),
                stubborn: stubborn.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(&'static str, u32)> {
            self.calls.lock().clone()
        }

        fn closed_pids(&self) -> Vec<u32> {
            self.calls()
                .into_iter()
                .filter(|(kind, _)| *kind == "close")
                .map(|(_, pid)| pid)
                .collect()
        }
    }

    impl ProcessSignaller for RecordingSignaller {
        fn is_running(&self, pid: u32) -> bool {
            self.alive.lock().contains(&pid)
        }

        fn request_close(&self, pid: u32) -> Result<(), TerminationWarning> {
            self.calls.lock().push(("close", pid));
            if !self.alive.lock().contains(&pid) {
                return Err(TerminationWarning::AlreadyExited { pid });
            }
            if !self.stubborn.contains(&pid) {
                self.alive.lock().remove(&pid);
            }
            Ok(())
        }

        fn force_kill(&self, pid: u32) -> Result<(), TerminationWarning> {
            self.calls.lock().push(("kill", pid));
            if self.alive.lock().remove(&pid) {
                Ok(())
            } else {
                Err(TerminationWarning::AlreadyExited { pid })
            }
        }
    }

    #[test]
    fn test_discover_walks_grandchildren() {
        let table = vec![
            proc(1, 0, 0),
            proc(100, 1, 10),
            proc(200, 100, 11),
            proc(300, 200, 12),
            proc(400, 1, 13),
        ];
        let controller = ProcessTreeController::new(
            FakeIntrospector::new(table),
            RecordingSignaller::new(&[], &[]),
        );

        let root = ProcessHandle::unowned(100, at(10));
        let mut found: Vec<u32> = controller
            .discover_descendants(&root)
            .iter()
            .map(|p| p.pid)
            .collect();
        found.sort_unstable();

        assert_eq!(found, vec![200, 300]);
    }

    #[test]
    fn test_discover_excludes_processes_older_than_root() {
        // 250 claims 100 as parent but predates it: pid reuse
        let table = vec![proc(100, 1, 10), proc(200, 100, 11), proc(250, 100, 5), proc(260, 250, 12)];
        let controller = ProcessTreeController::new(
            FakeIntrospector::new(table),
            RecordingSignaller::new(&[], &[]),
        );

        let root = ProcessHandle::unowned(100, at(10));
        let found: Vec<u32> = controller
            .discover_descendants(&root)
            .iter()
            .map(|p| p.pid)
            .collect();

        assert_eq!(found, vec![200]);
    }

    #[test]
    fn test_discover_nothing_when_root_pid_reused() {
        let table = vec![proc(100, 1, 50), proc(200, 100, 51)];
        let controller = ProcessTreeController::new(
            FakeIntrospector::new(table),
            RecordingSignaller::new(&[], &[]),
        );

        let root = ProcessHandle::unowned(100, at(10));
        assert!(controller.discover_descendants(&root).is_empty());
    }

    #[test]
    fn test_discover_survives_parent_cycle() {
        let table = vec![proc(100, 1, 10), proc(500, 501, 20), proc(501, 500, 20)];
        let controller = ProcessTreeController::new(
            FakeIntrospector::new(table),
            RecordingSignaller::new(&[], &[]),
        );

        let root = ProcessHandle::unowned(100, at(10));
        assert!(controller.discover_descendants(&root).is_empty());
    }

    #[tokio::test]
    async fn test_terminate_kills_children_before_parent() {
        let table = vec![proc(100, 1, 10), proc(201, 100, 11), proc(202, 100, 12)];
        let signaller = RecordingSignaller::new(&[100, 201, 202], &[]);
        let controller = ProcessTreeController::new(FakeIntrospector::new(table), signaller.clone());

        let root = ProcessHandle::unowned(100, at(10));
        let warnings = controller
            .terminate(&root, &BTreeMap::new(), Duration::from_millis(200))
            .await;

        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
        assert_eq!(signaller.closed_pids(), vec![201, 202, 100]);
    }

    #[tokio::test]
    async fn test_terminate_is_depth_first() {
        let table = vec![
            proc(100, 1, 10),
            proc(201, 100, 11),
            proc(301, 201, 12),
            proc(302, 201, 13),
            proc(202, 100, 14),
        ];
        let signaller = RecordingSignaller::new(&[100, 201, 202, 301, 302], &[]);
        let controller = ProcessTreeController::new(FakeIntrospector::new(table), signaller.clone());

        let root = ProcessHandle::unowned(100, at(10));
        controller
            .terminate(&root, &BTreeMap::new(), Duration::from_millis(200))
            .await;

        assert_eq!(signaller.closed_pids(), vec![301, 302, 201, 202, 100]);
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_force_kill() {
        let table = vec![proc(100, 1, 10), proc(201, 100, 11)];
        let signaller = RecordingSignaller::new(&[100, 201], &[201]);
        let controller = ProcessTreeController::new(FakeIntrospector::new(table), signaller.clone());

        let root = ProcessHandle::unowned(100, at(10));
        let warnings = controller
            .terminate(&root, &BTreeMap::new(), Duration::from_millis(100))
            .await;

        assert!(warnings.is_empty());
        assert_eq!(
            signaller.calls(),
            vec![("close", 201), ("kill", 201), ("close", 100)]
        );
    }

    #[tokio::test]
    async fn test_terminate_swallows_already_exited() {
        let table = vec![proc(100, 1, 10), proc(201, 100, 11)];
        // 201 is in the table but already dead by the time we signal it
        let signaller = RecordingSignaller::new(&[100], &[]);
        let controller = ProcessTreeController::new(FakeIntrospector::new(table), signaller.clone());

        let root = ProcessHandle::unowned(100, at(10));
        let warnings = controller
            .terminate(&root, &BTreeMap::new(), Duration::from_millis(100))
            .await;

        assert_eq!(warnings, vec![TerminationWarning::AlreadyExited { pid: 201 }]);
        assert_eq!(signaller.closed_pids(), vec![201, 100]);
    }

    #[tokio::test]
    async fn test_terminate_includes_matching_tracked_orphans() {
        // 600 was reparented to init after its parent died; 700's pid was reused
        let table = vec![proc(100, 1, 10), proc(600, 1, 20), proc(700, 1, 30)];
        let signaller = RecordingSignaller::new(&[100, 600, 700], &[]);
        let controller = ProcessTreeController::new(FakeIntrospector::new(table), signaller.clone());

        let mut tracked = BTreeMap::new();
        tracked.insert(600, at(20));
        tracked.insert(700, at(25));

        let root = ProcessHandle::unowned(100, at(10));
        controller
            .terminate(&root, &tracked, Duration::from_millis(100))
            .await;

        assert_eq!(signaller.closed_pids(), vec![600, 100]);
        assert!(signaller.is_running(700));
    }

    #[test]
    fn test_still_matches() {
        let controller = ProcessTreeController::new(
            FakeIntrospector::new(vec![proc(42, 1, 5)]),
            RecordingSignaller::new(&[], &[]),
        );
        assert!(controller.still_matches(42, at(5)));
        assert!(!controller.still_matches(42, at(6)));
        assert!(!controller.still_matches(43, at(5)));
    }

    #[cfg(unix)]
    mod os {
        use super::super::*;

        #[tokio::test]
        async fn test_launch_missing_executable() {
            let controller = ProcessTreeController::native();
            let spec = LaunchSpec {
                executable: PathBuf::from("/definitely/not/here/app"),
                ..Default::default()
            };
            let err = controller.launch(&spec, "missing").unwrap_err();
            assert!(matches!(err, LaunchError::PathInvalid { .. }));
        }

        #[tokio::test]
        async fn test_launch_missing_working_dir() {
            let controller = ProcessTreeController::native();
            let spec = LaunchSpec {
                executable: PathBuf::from("/bin/sh"),
                working_dir: Some(PathBuf::from("/definitely/not/here")),
                ..Default::default()
            };
            assert!(matches!(
                controller.launch(&spec, "bad-wd"),
                Err(LaunchError::PathInvalid { .. })
            ));
        }

        #[tokio::test]
        async fn test_launch_and_terminate_real_tree() {
            let controller = ProcessTreeController::native();
            let spec = LaunchSpec {
                executable: PathBuf::from("/bin/sh"),
                args: vec!["-c".into(), "sleep 30 & sleep 30 & wait".into()],
                ..Default::default()
            };
            let launched = controller.launch(&spec, "tree").unwrap();
            let root = launched.handle;

            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            let mut children = Vec::new();
            while children.len() < 2 && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
                children = controller.discover_descendants(&root);
            }
            assert_eq!(children.len(), 2, "expected two sleeping children");

            controller
                .terminate(&root, &BTreeMap::new(), Duration::from_secs(2))
                .await;

            assert!(root.wait_for_exit(Duration::from_secs(5)).await);
            for child in children {
                assert!(!crate::check::process_running(child.pid));
            }
        }

        /// Signals for real, keeping a log of every pid it was handed.
        #[derive(Default)]
        struct LoggingSignaller {
            pids: parking_lot::Mutex<Vec<u32>>,
        }

        impl ProcessSignaller for LoggingSignaller {
            fn is_running(&self, pid: u32) -> bool {
                crate::check::process_running(pid)
            }

            fn request_close(&self, pid: u32) -> Result<(), TerminationWarning> {
                self.pids.lock().push(pid);
                crate::terminate::request_close(pid)
            }

            fn force_kill(&self, pid: u32) -> Result<(), TerminationWarning> {
                self.pids.lock().push(pid);
                crate::terminate::force_kill(pid)
            }
        }

        #[tokio::test]
        async fn test_root_signalled_through_exit_watcher() {
            let signaller = Arc::new(LoggingSignaller::default());
            let controller = ProcessTreeController::new(
                crate::introspect::native_introspector(),
                signaller.clone(),
            );
            let spec = LaunchSpec {
                executable: PathBuf::from("/bin/sh"),
                args: vec!["-c".into(), "exec sleep 30".into()],
                ..Default::default()
            };
            let root = controller.launch(&spec, "root").unwrap().handle;

            let warnings = controller
                .terminate(&root, &BTreeMap::new(), Duration::from_secs(2))
                .await;
            assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
            assert!(root.has_exited());
            assert_eq!(*signaller.pids.lock(), vec![root.pid()]);

            // Reaped: the watcher refuses to hand the pid out again
            assert!(matches!(
                root.signal(TerminationSignal::Kill).await,
                Some(Err(TerminationWarning::AlreadyExited { .. }))
            ));
            assert_eq!(signaller.pids.lock().len(), 1);
        }

        #[tokio::test]
        async fn test_launch_applies_env_and_captures_stdout() {
            use tokio::io::AsyncReadExt;

            let controller = ProcessTreeController::native();
            let spec = LaunchSpec {
                executable: PathBuf::from("/bin/sh"),
                args: vec!["-c".into(), "printf %s \"$WARDEN_TEST_VALUE\"".into()],
                env: vec![("WARDEN_TEST_VALUE".into(), "hello".into())],
                capture_stdout: true,
                ..Default::default()
            };
            let mut launched = controller.launch(&spec, "env").unwrap();

            let mut out = String::new();
            launched
                .stdout
                .take()
                .unwrap()
                .read_to_string(&mut out)
                .await
                .unwrap();
            assert_eq!(out, "hello");
            assert!(launched.handle.wait_for_exit(Duration::from_secs(5)).await);
            assert_eq!(launched.handle.exit_code(), Some(0));
        }
    }
}
