//! Advisory lock marker for the configuration tree
//!
//! The marker is a plain file holding the owning process id. It only gates
//! restore; nothing else in nixenv waits on it.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{NixEnvError, NixEnvResult};

/// Held lock marker, removed on drop
#[derive(Debug)]
pub struct LockMarker {
    path: PathBuf,
}

impl LockMarker {
    /// Create the marker at `path`; fails with `Locked` if it already exists
    pub fn acquire(path: &Path) -> NixEnvResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => NixEnvError::Locked(format!(
                    "{} exists{}",
                    path.display(),
                    Self::owner(path)
                        .map(|pid| format!(" (held by pid {})", pid))
                        .unwrap_or_default()
                )),
                _ => NixEnvError::Io(format!("Failed to create lock {}: {}", path.display(), e)),
            })?;

        writeln!(file, "{}", std::process::id())
            .map_err(|e| NixEnvError::Io(format!("Failed to write lock {}: {}", path.display(), e)))?;

        debug!("Acquired lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Whether a marker exists at `path`
    pub fn is_held(path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    /// Process id recorded in the marker, if readable
    pub fn owner(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockMarker {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}
