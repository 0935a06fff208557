//! Core types for log collection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stream type (stdout or stderr)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamType::Stdout => write!(f, "stdout"),
            StreamType::Stderr => write!(f, "stderr"),
        }
    }
}

/// When and how a sink rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSettings {
    pub enabled: bool,
    /// Rotate once the file reaches this many bytes. 0 disables rotation.
    pub size_bytes: u64,
    /// Rotated files to keep. 0 keeps all of them.
    pub max_rotations: u32,
}

impl RotationSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            size_bytes: 0,
            max_rotations: 0,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.enabled && self.size_bytes > 0
    }
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            size_bytes: 10 * 1024 * 1024,
            max_rotations: 5,
        }
    }
}

/// Per-stream capture counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub lines: u64,
    pub bytes: u64,
    pub last_activity: Option<DateTime<Utc>>,
}
