//! Point-of-use checks on launch paths.
//!
//! Configuration is validated upstream; these only turn a vanished file or a
//! dropped permission bit into the right [`LaunchError`] before spawning.

use std::path::Path;
use warden_common::{LaunchError, LaunchResult};

/// Validate that an executable exists and may be executed.
///
/// Bare program names (no path separator) are resolved through `PATH` at
/// spawn time and are not checked here.
pub fn validate_executable(path: &Path) -> LaunchResult<()> {
    if path.as_os_str().is_empty() {
        return Err(LaunchError::path_invalid(path, "executable path is empty"));
    }

    if path.components().count() == 1 && !path.is_absolute() {
        return Ok(());
    }

    let metadata = std::fs::metadata(path).map_err(|e| LaunchError::from_io(path, &e))?;
    if !metadata.is_file() {
        return Err(LaunchError::path_invalid(path, "not a regular file"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(LaunchError::access_denied(path, "file is not executable"));
        }
    }

    Ok(())
}

/// Validate that a working directory exists.
pub fn validate_working_dir(dir: &Path) -> LaunchResult<()> {
    match std::fs::metadata(dir) {
        Ok(m) if m.is_dir() => Ok(()),
        Ok(_) => Err(LaunchError::path_invalid(dir, "working directory is not a directory")),
        Err(e) => Err(LaunchError::from_io(dir, &e)),
    }
}
