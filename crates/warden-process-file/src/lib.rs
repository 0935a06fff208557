//! # Warden Process File
//!
//! JSON status file that lets external tools (service manager status calls,
//! console-tailing UIs) find the supervised main process without talking to
//! the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use warden_common::{SupervisorError, SupervisorResult};
use warden_state::SupervisorState;

/// Status file contents (persisted as JSON)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusFile {
    pub service_name: String,
    pub pid: Option<u32>,
    pub state: SupervisorState,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_attempts: u32,
    pub last_exit_code: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl StatusFile {
    pub fn new(service_name: impl Into<String>, state: SupervisorState) -> Self {
        Self {
            service_name: service_name.into(),
            pid: None,
            state,
            started_at: None,
            restart_attempts: 0,
            last_exit_code: None,
            updated_at: Utc::now(),
        }
    }

    /// Save to disk atomically (temp file, then rename).
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> SupervisorResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| {
            SupervisorError::configuration(format!("Failed to serialize status file: {}", e))
        })?;

        let temp_path = temp_path_for(path);
        tokio::fs::write(&temp_path, json).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    /// Load from disk.
    pub async fn load<P: AsRef<Path>>(path: P) -> SupervisorResult<Self> {
        let content = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&content).map_err(|e| {
            SupervisorError::configuration(format!(
                "Failed to parse status file {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Delete from disk. Missing files are fine.
    pub async fn delete<P: AsRef<Path>>(path: P) -> SupervisorResult<()> {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("status"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/svc.status.json");

        let mut status = StatusFile::new("svc", SupervisorState::Running);
        status.pid = Some(4321);
        status.restart_attempts = 2;
        status.save(&path).await.unwrap();

        let loaded = StatusFile::load(&path).await.unwrap();
        assert_eq!(loaded, status);
        assert!(!dir.path().join("run/svc.status.json.tmp").exists());

        StatusFile::delete(&path).await.unwrap();
        assert!(!path.exists());
        StatusFile::delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.json");

        StatusFile::new("svc", SupervisorState::Running)
            .save(&path)
            .await
            .unwrap();
        let mut failed = StatusFile::new("svc", SupervisorState::Failed);
        failed.last_exit_code = Some(1);
        failed.save(&path).await.unwrap();

        let loaded = StatusFile::load(&path).await.unwrap();
        assert_eq!(loaded.state, SupervisorState::Failed);
        assert_eq!(loaded.last_exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_state_serialized_snake_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.json");
        StatusFile::new("svc", SupervisorState::PostStopping)
            .save(&path)
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"post_stopping\""));
    }

    #[tokio::test]
    async fn test_load_garbage_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            StatusFile::load(&path).await,
            Err(SupervisorError::Configuration { .. })
        ));
        assert!(matches!(
            StatusFile::load(dir.path().join("missing.json")).await,
            Err(SupervisorError::Io(_))
        ));
    }
}
