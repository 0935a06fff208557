//! Size-rotated append-only log file.

use crate::types::RotationSettings;
use chrono::Utc;
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use warden_common::RotationFailure;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

struct SinkState {
    writer: Option<BufWriter<File>>,
    current_size: u64,
    generation: u64,
    closed: bool,
}

/// Append-only writer that rotates its file at a size threshold.
///
/// Every write is flushed before the call returns. Writes after
/// [`close`](Self::close) are silently dropped.
pub struct RotatingLogSink {
    path: PathBuf,
    settings: RotationSettings,
    state: Mutex<SinkState>,
}

impl std::fmt::Debug for RotatingLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RotatingLogSink")
            .field("path", &self.path)
            .field("settings", &self.settings)
            .field("current_size", &state.current_size)
            .field("generation", &state.generation)
            .field("closed", &state.closed)
            .finish()
    }
}

/// A rotated file on disk and the parts of its name used for ordering.
#[derive(Debug, Clone)]
struct RotatedFile {
    path: PathBuf,
    modified: SystemTime,
    stamp: String,
    seq: u32,
}

impl RotatingLogSink {
    /// Open (or create) the file at `path` for appending.
    pub fn open(path: impl Into<PathBuf>, settings: RotationSettings) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let (writer, current_size) = open_append(&path)?;
        debug!(
            path = %path.display(),
            size = current_size,
            "Log sink opened"
        );

        Ok(Self {
            path,
            settings,
            state: Mutex::new(SinkState {
                writer: Some(writer),
                current_size,
                generation: 0,
                closed: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> RotationSettings {
        self.settings
    }

    /// Bytes in the active file.
    pub fn current_size(&self) -> u64 {
        self.state.lock().current_size
    }

    /// Number of successful rotations since the sink was opened.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn write_line(&self, text: &str) -> io::Result<()> {
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(b'\n');
        self.write_bytes(&buf)
    }

    pub fn write(&self, text: &str) -> io::Result<()> {
        self.write_bytes(text.as_bytes())
    }

    /// Append, flush, then rotate if the threshold has been reached.
    pub fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }

        if state.writer.is_none() {
            // An earlier reopen failed; try again before giving up on this write
            let (writer, size) = open_append(&self.path)?;
            state.writer = Some(writer);
            state.current_size = size;
        }

        if let Some(writer) = state.writer.as_mut() {
            writer.write_all(data)?;
            writer.flush()?;
        }
        state.current_size += data.len() as u64;

        if self.settings.is_active() && state.current_size >= self.settings.size_bytes {
            if let Err(failure) = self.rotate_locked(&mut state) {
                warn!(path = %self.path.display(), "Log rotation failed: {}", failure);
            }
        }

        Ok(())
    }

    /// Flush and release the file. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(mut writer) = state.writer.take() {
            if let Err(e) = writer.flush() {
                warn!(path = %self.path.display(), "Failed to flush log on close: {}", e);
            }
        }
        debug!(path = %self.path.display(), "Log sink closed");
    }

    /// Rotated files currently on disk, newest first.
    pub fn rotated_files(&self) -> Vec<PathBuf> {
        self.list_rotated().into_iter().map(|f| f.path).collect()
    }

    fn rotate_locked(&self, state: &mut SinkState) -> Result<(), RotationFailure> {
        // Flush and close before the rename so no byte is left behind
        if let Some(mut writer) = state.writer.take() {
            let _ = writer.flush();
        }

        let target = self.next_rotation_path();
        if let Err(e) = std::fs::rename(&self.path, &target) {
            // Keep writing to the same file; the next write retries
            self.reopen_locked(state, false)?;
            return Err(RotationFailure::Rename {
                from: self.path.clone(),
                to: target,
                reason: e.to_string(),
            });
        }

        self.reopen_locked(state, true)?;
        state.generation += 1;
        info!(
            path = %self.path.display(),
            rotated_to = %target.display(),
            generation = state.generation,
            "Log file rotated"
        );

        self.apply_retention();
        Ok(())
    }

    fn reopen_locked(&self, state: &mut SinkState, fresh: bool) -> Result<(), RotationFailure> {
        match open_append(&self.path) {
            Ok((writer, size)) => {
                state.writer = Some(writer);
                state.current_size = if fresh { 0 } else { size };
                Ok(())
            }
            Err(e) => Err(RotationFailure::Reopen {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn next_rotation_path(&self) -> PathBuf {
        let stamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let base = self.with_suffix(&stamp);

        // Continue numbering after the highest sequence for this second so that
        // names keep sorting by age even after retention removed older ones
        let highest = self
            .list_rotated()
            .into_iter()
            .filter(|f| f.stamp == stamp)
            .map(|f| f.seq)
            .max();

        match highest {
            None if !base.exists() => base,
            None => self.with_suffix(&format!("{}.(1)", stamp)),
            Some(seq) => self.with_suffix(&format!("{}.({})", stamp, seq + 1)),
        }
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn list_rotated(&self) -> Vec<RotatedFile> {
        let Some(file_name) = self.path.file_name().and_then(|n| n.to_str()) else {
            return Vec::new();
        };
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        let prefix = format!("{}.", file_name);

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Failed to list {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut files: Vec<RotatedFile> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let (stamp, seq) = parse_rotation_suffix(name.strip_prefix(&prefix)?)?;
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some(RotatedFile {
                    path: entry.path(),
                    modified,
                    stamp,
                    seq,
                })
            })
            .collect();

        files.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.stamp.cmp(&a.stamp))
                .then_with(|| b.seq.cmp(&a.seq))
        });
        files
    }

    /// Delete rotated files beyond `max_rotations`, oldest first.
    /// Failures are logged and otherwise ignored.
    fn apply_retention(&self) {
        let keep = self.settings.max_rotations as usize;
        if keep == 0 {
            return;
        }

        for old in self.list_rotated().into_iter().skip(keep) {
            match std::fs::remove_file(&old.path) {
                Ok(()) => debug!(path = %old.path.display(), "Deleted old rotated log"),
                Err(e) => {
                    let failure = RotationFailure::RetentionDelete {
                        path: old.path.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{}", failure);
                }
            }
        }
    }
}

impl Drop for RotatingLogSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_append(path: &Path) -> io::Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata()?.len();
    Ok((BufWriter::new(file), size))
}

/// Split `YYYYMMDD_HHmmss[.(n)]` into the stamp and sequence number
/// (0 when absent).
fn parse_rotation_suffix(suffix: &str) -> Option<(String, u32)> {
    let (stamp, seq) = match suffix.split_once('.') {
        Some((stamp, rest)) => {
            let n = rest.strip_prefix('(')?.strip_suffix(')')?.parse().ok()?;
            (stamp, n)
        }
        None => (suffix, 0),
    };

    let bytes = stamp.as_bytes();
    let well_formed = bytes.len() == 15
        && bytes[8] == b'_'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 8 || b.is_ascii_digit());

    well_formed.then(|| (stamp.to_string(), seq))
}
