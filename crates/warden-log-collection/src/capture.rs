//! Pumps a child's output pipes into rotating sinks.

use crate::sink::RotatingLogSink;
use crate::types::{RotationSettings, StreamStats, StreamType};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long `close` lets pumps drain what the child already wrote.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest line kept in memory; longer output is written in pieces.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Where captured output goes.
#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub rotation: RotationSettings,
}

/// Output capture for one session.
///
/// Sinks outlive individual processes: after a restart the new process's
/// pipes are attached to the same sinks.
pub struct OutputCapture {
    service_name: String,
    stdout_sink: Option<Arc<RotatingLogSink>>,
    stderr_sink: Option<Arc<RotatingLogSink>>,
    stats: Arc<RwLock<HashMap<StreamType, StreamStats>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for OutputCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputCapture")
            .field("service_name", &self.service_name)
            .field("stdout_sink", &self.stdout_sink.as_ref().map(|s| s.path().to_path_buf()))
            .field("stderr_sink", &self.stderr_sink.as_ref().map(|s| s.path().to_path_buf()))
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

impl OutputCapture {
    /// Open the configured sinks. Streams pointing at the same path share one
    /// sink, so they also share its lock and rotation sequence.
    pub fn open(service_name: &str, config: &CaptureConfig) -> io::Result<Self> {
        let stdout_sink = match config.stdout_path {
            Some(ref path) => Some(Arc::new(RotatingLogSink::open(path, config.rotation)?)),
            None => None,
        };

        let stderr_sink = match (&config.stderr_path, &stdout_sink) {
            (Some(path), Some(shared)) if shared.path() == path.as_path() => {
                debug!(service = %service_name, "stdout and stderr share {}", path.display());
                Some(Arc::clone(shared))
            }
            (Some(path), _) => Some(Arc::new(RotatingLogSink::open(path, config.rotation)?)),
            (None, _) => None,
        };

        Ok(Self {
            service_name: service_name.to_string(),
            stdout_sink,
            stderr_sink,
            stats: Arc::new(RwLock::new(HashMap::new())),
            tasks: Mutex::new(Vec::new()),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Whether a sink is configured for `stream`.
    pub fn wants(&self, stream: StreamType) -> bool {
        self.sink(stream).is_some()
    }

    pub fn sink(&self, stream: StreamType) -> Option<&Arc<RotatingLogSink>> {
        match stream {
            StreamType::Stdout => self.stdout_sink.as_ref(),
            StreamType::Stderr => self.stderr_sink.as_ref(),
        }
    }

    /// Start pumping `reader` into the sink for `stream`.
    pub fn attach<R>(&self, reader: R, stream: StreamType)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let Some(sink) = self.sink(stream).cloned() else {
            debug!(service = %self.service_name, %stream, "No sink configured; output dropped");
            return;
        };

        let task = tokio::spawn(stream_reader(
            reader,
            stream,
            self.service_name.clone(),
            sink,
            Arc::clone(&self.stats),
            self.cancel_token.child_token(),
        ));

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    pub fn stats(&self, stream: StreamType) -> StreamStats {
        self.stats.read().get(&stream).cloned().unwrap_or_default()
    }

    /// Let the pumps drain, stop them, and close the sinks.
    pub async fn close(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
                // Pipe held open by a surviving grandchild
                task.abort();
            }
        }
        self.cancel_token.cancel();

        if let Some(ref sink) = self.stdout_sink {
            sink.close();
        }
        if let Some(ref sink) = self.stderr_sink {
            sink.close();
        }

        info!(service = %self.service_name, "Output capture closed");
    }
}

async fn stream_reader<R>(
    reader: R,
    stream: StreamType,
    service: String,
    sink: Arc<RotatingLogSink>,
    stats: Arc<RwLock<HashMap<StreamType, StreamStats>>>,
    cancel_token: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    debug!(service = %service, %stream, "Stream reader started");
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    let mut lines = 0u64;

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!(service = %service, %stream, "Stream reader cancelled");
                break;
            }
            result = limited.read_until(b'\n', &mut buf) => {
                match result {
                    Ok(0) => {
                        debug!(service = %service, %stream, "Stream ended");
                        break;
                    }
                    Ok(n) => {
                        lines += 1;
                        // Child output need not be valid UTF-8
                        let text = String::from_utf8_lossy(&buf);
                        let line = text.trim_end_matches(['\n', '\r']);

                        if let Err(e) = sink.write_line(line) {
                            warn!(service = %service, %stream, error = %e, "Failed to write captured line");
                        }

                        let mut guard = stats.write();
                        let entry = guard.entry(stream).or_default();
                        entry.lines += 1;
                        entry.bytes += n as u64;
                        entry.last_activity = Some(Utc::now());
                    }
                    Err(e) => {
                        error!(service = %service, %stream, error = %e, "Error reading from stream");
                        break;
                    }
                }
            }
        }
    }

    debug!(service = %service, %stream, lines, "Stream reader finished");
}
