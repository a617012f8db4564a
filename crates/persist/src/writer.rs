use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pipeline::SaveError;

/// Where an artifact lives: `folder/filename`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveTarget {
    pub folder: PathBuf,
    pub filename: String,
}

impl SaveTarget {
    pub fn new(folder: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            filename: filename.into(),
        }
    }

    /// Final artifact path.
    pub fn path(&self) -> PathBuf {
        self.folder.join(&self.filename)
    }

    /// Scratch file the artifact is written to before the rename.
    pub fn temp_path(&self) -> PathBuf {
        self.folder.join(format!("{}.tmp", self.filename))
    }
}

/// Write `bytes` as the complete contents of `target`, replacing any existing
/// file atomically.
///
/// 1. Create the folder if missing
/// 2. Write and fsync a temp file next to the destination
/// 3. Rename over the destination (atomic on POSIX)
/// 4. Fsync the folder so the rename itself is durable
///
/// A failed attempt removes the temp file and leaves any previous artifact in place.
pub fn write_atomic(target: &SaveTarget, bytes: &[u8]) -> Result<PathBuf, SaveError> {
    let final_path = target.path();
    let temp_path = target.temp_path();

    if !target.folder.as_os_str().is_empty() && !target.folder.exists() {
        debug!(folder = %target.folder.display(), "creating save folder");
        std::fs::create_dir_all(&target.folder).map_err(|source| SaveError::CreateDir {
            path: target.folder.clone(),
            source,
        })?;
    }

    if temp_path.exists() {
        warn!(path = %temp_path.display(), "removing stale temp file");
        remove_temp(&temp_path);
    }

    if let Err(source) = write_synced(&temp_path, bytes) {
        warn!(
            temp_path = %temp_path.display(),
            error = %source,
            "write failed, cleaning up temp file"
        );
        remove_temp(&temp_path);
        return Err(SaveError::Write {
            path: temp_path,
            source,
        });
    }

    if let Err(source) = std::fs::rename(&temp_path, &final_path) {
        warn!(
            temp_path = %temp_path.display(),
            error = %source,
            "rename failed, cleaning up temp file"
        );
        remove_temp(&temp_path);
        return Err(SaveError::Write {
            path: final_path,
            source,
        });
    }

    sync_dir(&target.folder).map_err(|source| SaveError::Write {
        path: target.folder.clone(),
        source,
    })?;

    info!(
        path = %final_path.display(),
        size_bytes = bytes.len(),
        "artifact written"
    );
    Ok(final_path)
}

fn remove_temp(path: &Path) {
    if let Err(error) = std::fs::remove_file(path) {
        warn!(path = %path.display(), %error, "failed to remove temp file");
    }
}

#[cfg(unix)]
fn sync_dir(folder: &Path) -> std::io::Result<()> {
    let dir = if folder.as_os_str().is_empty() {
        Path::new(".")
    } else {
        folder
    };
    File::open(dir)?.sync_all()
}

// Directories cannot be opened for fsync outside unix.
#[cfg(not(unix))]
fn sync_dir(_folder: &Path) -> std::io::Result<()> {
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
