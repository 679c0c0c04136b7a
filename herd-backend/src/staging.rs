//! Shared file staging helpers

use herd_core::backend::{BackendError, StagedFile};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Keep at most this much console output per result
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Creates folders and writes files, marking scripts executable
pub async fn stage(folders: &[PathBuf], files: &[StagedFile]) -> Result<(), BackendError> {
    for folder in folders {
        tokio::fs::create_dir_all(folder).await?;
    }

    for file in files {
        if let Some(parent) = file.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file.path, &file.contents).await?;
        if file.executable {
            set_executable(&file.path).await?;
        }
        debug!("Staged {}", file.path.display());
    }

    Ok(())
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<(), BackendError> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<(), BackendError> {
    Ok(())
}

/// Deletes files, logging failures instead of returning them
pub async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} already gone", path.display())
            }
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

/// Reads a job's console output. A missing file reads as empty.
pub async fn read_output(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let start = bytes.len().saturating_sub(MAX_OUTPUT_BYTES);
            String::from_utf8_lossy(&bytes[start..]).to_string()
        }
        Err(e) => {
            debug!("No output at {}: {}", path.display(), e);
            String::new()
        }
    }
}

#[cfg(test)]
pub(crate) fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("herd-test-{}", uuid::Uuid::new_v4().simple()))
}
