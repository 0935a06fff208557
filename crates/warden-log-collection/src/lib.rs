//! # Warden Log Collection
//!
//! Captures the supervised process's stdout/stderr into size-rotated files.
//!
//! - [`RotatingLogSink`]: append-only writer that renames the file to
//!   `<name>.<YYYYMMDD_HHmmss>[.(n)]` once it reaches a size threshold
//! - [`OutputCapture`]: per-session pumps from child pipes into the sinks

pub mod capture;
pub mod sink;
pub mod types;

pub use capture::{CaptureConfig, OutputCapture};
pub use sink::RotatingLogSink;
pub use types::{RotationSettings, StreamStats, StreamType};
