//! OS process-table introspection.
//!
//! The tree controller only needs parent pids and start times. Linux reads
//! them straight from `/proc`; other platforms go through `sysinfo`.

use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessRefreshKind, System};

/// One row of the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub start_time: SystemTime,
}

/// Read access to the OS process table.
pub trait ProcessIntrospector: Send + Sync {
    /// Every process currently visible.
    fn snapshot(&self) -> Vec<ProcessInfo>;

    /// A single process, if it exists.
    fn process_info(&self, pid: u32) -> Option<ProcessInfo>;
}

/// Pick the introspector for the current platform.
pub fn native_introspector() -> std::sync::Arc<dyn ProcessIntrospector> {
    #[cfg(target_os = "linux")]
    {
        std::sync::Arc::new(ProcfsIntrospector::new())
    }

    #[cfg(not(target_os = "linux"))]
    {
        std::sync::Arc::new(SysinfoIntrospector::new())
    }
}

/// Fields of `/proc/<pid>/stat` used here.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProcStat {
    pub state: char,
    pub ppid: u32,
    pub start_ticks: u64,
}

#[cfg(target_os = "linux")]
pub(crate) fn parse_proc_stat(contents: &str) -> Option<ProcStat> {
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let rest = &contents[contents.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    Some(ProcStat {
        state: fields.first()?.chars().next()?,
        ppid: fields.get(1)?.parse().ok()?,
        start_ticks: fields.get(19)?.parse().ok()?,
    })
}

#[cfg(target_os = "linux")]
pub(crate) fn read_proc_stat(pid: u32) -> Option<ProcStat> {
    let contents = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_proc_stat(&contents)
}

/// `/proc`-backed introspector.
#[cfg(target_os = "linux")]
pub struct ProcfsIntrospector {
    boot_time: SystemTime,
    ticks_per_second: u64,
}

#[cfg(target_os = "linux")]
impl ProcfsIntrospector {
    pub fn new() -> Self {
        let boot_secs = std::fs::read_to_string("/proc/stat")
            .ok()
            .and_then(|stat| {
                stat.lines()
                    .find_map(|line| line.strip_prefix("btime "))
                    .and_then(|v| v.trim().parse::<u64>().ok())
            })
            .unwrap_or(0);

        let ticks_per_second = nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK)
            .ok()
            .flatten()
            .filter(|t| *t > 0)
            .map(|t| t as u64)
            .unwrap_or(100);

        Self {
            boot_time: UNIX_EPOCH + Duration::from_secs(boot_secs),
            ticks_per_second,
        }
    }

    fn to_info(&self, pid: u32, stat: ProcStat) -> ProcessInfo {
        let since_boot = Duration::from_millis(stat.start_ticks * 1000 / self.ticks_per_second);
        ProcessInfo {
            pid,
            parent_pid: (stat.ppid != 0).then_some(stat.ppid),
            start_time: self.boot_time + since_boot,
        }
    }
}

#[cfg(target_os = "linux")]
impl Default for ProcfsIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl ProcessIntrospector for ProcfsIntrospector {
    fn snapshot(&self) -> Vec<ProcessInfo> {
        let entries = match std::fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read /proc: {}", e);
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            // Processes may exit between readdir and the stat read
            .filter_map(|pid| self.process_info(pid))
            .collect()
    }

    fn process_info(&self, pid: u32) -> Option<ProcessInfo> {
        read_proc_stat(pid).map(|stat| self.to_info(pid, stat))
    }
}

/// `sysinfo`-backed introspector for platforms without procfs.
pub struct SysinfoIntrospector {
    system: Mutex<System>,
}

impl SysinfoIntrospector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn to_info(pid: Pid, process: &sysinfo::Process) -> ProcessInfo {
        ProcessInfo {
            pid: pid.as_u32(),
            parent_pid: process.parent().map(|p| p.as_u32()),
            start_time: UNIX_EPOCH + Duration::from_secs(process.start_time()),
        }
    }
}

impl Default for SysinfoIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessIntrospector for SysinfoIntrospector {
    fn snapshot(&self) -> Vec<ProcessInfo> {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(ProcessRefreshKind::new());
        system
            .processes()
            .iter()
            .map(|(pid, process)| Self::to_info(*pid, process))
            .collect()
    }

    fn process_info(&self, pid: u32) -> Option<ProcessInfo> {
        let mut system = self.system.lock();
        let sysinfo_pid = Pid::from_u32(pid);
        if !system.refresh_process_specifics(sysinfo_pid, ProcessRefreshKind::new()) {
            return None;
        }
        system
            .process(sysinfo_pid)
            .map(|process| Self::to_info(sysinfo_pid, process))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn test_parse_proc_stat_with_tricky_comm() {
        let line = "4242 (my (weird) proc) S 17 4242 4242 0 -1 4194560 100 0 0 0 \
                    1 2 0 0 20 0 1 0 987654 1000000 200 18446744073709551615";
        let stat = parse_proc_stat(line).unwrap();
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 17);
        assert_eq!(stat.start_ticks, 987654);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_parse_proc_stat_truncated() {
        assert!(parse_proc_stat("12 (x) S 1 2").is_none());
        assert!(parse_proc_stat("garbage").is_none());
    }

    #[test]
    fn test_native_introspector_sees_self() {
        let introspector = native_introspector();
        let me = introspector.process_info(std::process::id()).unwrap();
        assert_eq!(me.pid, std::process::id());
        assert!(me.start_time <= SystemTime::now());
        assert!(introspector
            .snapshot()
            .iter()
            .any(|p| p.pid == std::process::id()));
    }

    #[test]
    #[cfg(unix)]
    fn test_child_reports_parent() {
        let mut child = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 5")
            .spawn()
            .unwrap();

        let introspector = native_introspector();
        let info = introspector.process_info(child.id()).unwrap();
        assert_eq!(info.parent_pid, Some(std::process::id()));

        let me = introspector.process_info(std::process::id()).unwrap();
        assert!(info.start_time >= me.start_time);

        child.kill().unwrap();
        child.wait().unwrap();
    }
}
