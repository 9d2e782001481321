//! Restore functionality for nixenv
//!
//! A restore never writes into the live tree until the archive has been fully
//! unpacked into a staging directory and checked against its manifest. The
//! swap itself moves top-level entries, so a failure part-way through can put
//! the previous entries back.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::decrypt_bytes;
use crate::error::{NixEnvError, NixEnvResult};
use crate::storage::atomic::{sync_dir, RenameFn};

use super::archive;
use super::lock::LockMarker;
use super::manager::{BackupEntry, BackupManager, BackupMetadata, ASIDE_PREFIX, STAGING_PREFIX};

/// Result of a restore operation
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub backup: String,
    /// Date the backup was created
    pub backup_date: DateTime<Utc>,
    /// Safety backup taken before the live tree was replaced
    pub safety_backup: Option<String>,
    /// Archive entries unpacked
    pub entries_restored: usize,
    /// Files checked against the manifest
    pub files_verified: usize,
}

impl RestoreReport {
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Restored {} ({} entries, {} files verified)",
            self.backup, self.entries_restored, self.files_verified
        );
        if let Some(safety) = &self.safety_backup {
            summary.push_str(&format!("; previous state saved as {}", safety));
        }
        summary
    }
}

/// Result of verifying a backup without restoring it
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub backup: String,
    pub backup_date: DateTime<Utc>,
    pub encrypted: bool,
    /// Archive entries unpacked
    pub entries: usize,
    /// Files checked against the manifest
    pub files_verified: usize,
    /// Whether a manifest was available to check against
    pub has_manifest: bool,
}

impl VerificationReport {
    /// Whether every file was checked
    pub fn is_complete(&self) -> bool {
        self.has_manifest
    }

    pub fn summary(&self) -> String {
        if self.has_manifest {
            format!(
                "Backup {} is intact ({} files verified)",
                self.backup, self.files_verified
            )
        } else {
            format!(
                "Backup {} unpacks cleanly ({} entries) but has no manifest to verify against",
                self.backup, self.entries
            )
        }
    }
}

/// Scratch directory removed on drop
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn new(parent: &Path, prefix: &str) -> Self {
        Self {
            path: parent.join(format!("{}{}", prefix, Uuid::new_v4())),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// An unpacked, checked archive
struct Staged {
    dir: ScratchDir,
    entries: usize,
    metadata: Option<BackupMetadata>,
}

impl Staged {
    fn files_verified(&self) -> usize {
        self.metadata.as_ref().map_or(0, |m| m.checksums.len())
    }
}

impl BackupManager {
    /// Restore the configuration tree from a backup
    ///
    /// Fails with `Locked` while the lock marker exists unless `force` is set.
    /// Without `force` the current tree is saved as a `safety-` backup first.
    /// A backup without a manifest is restored unverified. On any failure the
    /// live tree is left as it was.
    pub fn restore(&self, name: &str, force: bool) -> NixEnvResult<RestoreReport> {
        let entry = self.get(name)?;

        let lock_held = LockMarker::is_held(self.lock_file());
        if lock_held && !force {
            return Err(NixEnvError::Locked(format!(
                "{} exists; restore with force to override",
                self.lock_file().display()
            )));
        }

        let staged = self.stage(&entry)?;

        let safety_backup = if force {
            None
        } else {
            Some(self.create_safety_backup(Utc::now())?.name)
        };

        let _lock = if lock_held {
            None
        } else {
            Some(LockMarker::acquire(self.lock_file())?)
        };
        self.swap_into_live(staged.dir.path(), &|from: &Path, to: &Path| fs::rename(from, to))?;

        let report = RestoreReport {
            backup: entry.name,
            backup_date: entry.created_at,
            safety_backup,
            entries_restored: staged.entries,
            files_verified: staged.files_verified(),
        };
        info!("{}", report.summary());
        Ok(report)
    }

    /// Unpack a backup to scratch space and check it against its manifest
    pub fn verify(&self, name: &str) -> NixEnvResult<VerificationReport> {
        let entry = self.get(name)?;
        let staged = self.stage(&entry)?;

        Ok(VerificationReport {
            backup: entry.name,
            backup_date: entry.created_at,
            encrypted: entry.encrypted,
            entries: staged.entries,
            files_verified: staged.files_verified(),
            has_manifest: staged.metadata.is_some(),
        })
    }

    fn stage(&self, entry: &BackupEntry) -> NixEnvResult<Staged> {
        let reader: Box<dyn Read> = if entry.encrypted {
            let key = self.require_key(&entry.name)?;
            let data = fs::read(&entry.path).map_err(|e| {
                NixEnvError::Io(format!("Failed to read {}: {}", entry.path.display(), e))
            })?;
            Box::new(Cursor::new(decrypt_bytes(&data, &key)?))
        } else {
            Box::new(File::open(&entry.path).map_err(|e| {
                NixEnvError::Io(format!("Failed to open {}: {}", entry.path.display(), e))
            })?)
        };

        let dir = ScratchDir::new(self.backup_dir(), STAGING_PREFIX);
        let entries = archive::unpack(reader, dir.path())?;
        debug!("Unpacked {} entries into {}", entries, dir.path().display());

        let metadata = self.read_metadata(&entry.name);
        match &metadata {
            Some(m) => m.checksums.verify(dir.path())?,
            None => warn!("Backup {} has no manifest; contents not verified", entry.name),
        }

        Ok(Staged {
            dir,
            entries,
            metadata,
        })
    }

    /// Replace the live top-level entries with the staged ones
    ///
    /// Moves go through `rename`; rollback always uses the real filesystem.
    fn swap_into_live(&self, staging: &Path, rename: RenameFn<'_>) -> NixEnvResult<()> {
        let live = self.config_dir();
        fs::create_dir_all(live)?;

        let protected = self.protected_names();
        let aside = self
            .backup_dir()
            .join(format!("{}{}", ASIDE_PREFIX, Uuid::new_v4()));
        fs::create_dir(&aside).map_err(|e| {
            NixEnvError::Io(format!("Failed to create {}: {}", aside.display(), e))
        })?;

        let mut moved_aside = Vec::new();
        for name in dir_names(live)? {
            if protected.contains(&name) {
                continue;
            }
            if let Err(e) = rename(&live.join(&name), &aside.join(&name)) {
                let err = NixEnvError::Io(format!(
                    "Failed to move {} aside: {}",
                    live.join(&name).display(),
                    e
                ));
                return Err(rollback(live, &aside, staging, &[], &moved_aside, err));
            }
            moved_aside.push(name);
        }

        let mut moved_in = Vec::new();
        for name in dir_names(staging)? {
            if protected.contains(&name) {
                continue;
            }
            if let Err(e) = rename(&staging.join(&name), &live.join(&name)) {
                let err = NixEnvError::Io(format!(
                    "Failed to move restored {} into place: {}",
                    name.to_string_lossy(),
                    e
                ));
                return Err(rollback(live, &aside, staging, &moved_in, &moved_aside, err));
            }
            moved_in.push(name);
        }

        sync_dir(live);
        if let Err(e) = fs::remove_dir_all(&aside) {
            warn!("Failed to remove {}: {}", aside.display(), e);
        }
        Ok(())
    }

    /// Top-level names in the live tree a restore never touches
    fn protected_names(&self) -> Vec<OsString> {
        self.excludes()
            .into_iter()
            .filter(|p| p.parent() == Some(self.config_dir()))
            .filter_map(|p| p.file_name().map(|n| n.to_os_string()))
            .collect()
    }
}

/// Undo a partial swap and hand back the error that caused it
fn rollback(
    live: &Path,
    aside: &Path,
    staging: &Path,
    moved_in: &[OsString],
    moved_aside: &[OsString],
    cause: NixEnvError,
) -> NixEnvError {
    let mut clean = true;

    for name in moved_in {
        if let Err(e) = fs::rename(live.join(name), staging.join(name)) {
            warn!("Rollback: failed to remove restored {}: {}", name.to_string_lossy(), e);
            clean = false;
        }
    }
    for name in moved_aside {
        if let Err(e) = fs::rename(aside.join(name), live.join(name)) {
            warn!("Rollback: failed to put back {}: {}", name.to_string_lossy(), e);
            clean = false;
        }
    }

    if clean {
        let _ = fs::remove_dir_all(aside);
        cause
    } else {
        NixEnvError::Io(format!(
            "{}; rollback incomplete, previous configuration left in {}",
            cause,
            aside.display()
        ))
    }
}

fn dir_names(dir: &Path) -> NixEnvResult<Vec<OsString>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)
        .map_err(|e| NixEnvError::Io(format!("Failed to read {}: {}", dir.display(), e)))?
    {
        names.push(entry?.file_name());
    }
    names.sort();
    Ok(names)
}
