//! Backup manager for nixenv
//!
//! Snapshots the whole configuration tree into `backups/<name>.tar.gz`, or
//! `<name>.tar.gz.enc` when a key provider is configured. Each archive has a
//! JSON sidecar (`<name>.manifest.json`) carrying its per-file checksum
//! manifest. Restore and verification live in `restore.rs`.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::paths::NixEnvPaths;
use crate::crypto::{decrypt_file, encrypt_file, EncryptionKey, KeyProvider};
use crate::error::{NixEnvError, NixEnvResult};
use crate::models::configuration::validate_name;
use crate::storage::atomic::{atomic_copy, atomic_rename, atomic_swap, with_suffix};
use crate::storage::file_io::{read_json, write_json_atomic};

use super::archive;
use super::checksum::ChecksumManifest;

/// Name prefix marking backups taken automatically before a restore
pub const SAFETY_PREFIX: &str = "safety-";

/// Plain archive suffix
pub const ARCHIVE_EXT: &str = ".tar.gz";

/// Encrypted archive suffix
pub const ENCRYPTED_EXT: &str = ".tar.gz.enc";

/// Sidecar suffix
pub const MANIFEST_EXT: &str = ".manifest.json";

const TMP_EXT: &str = ".tmp";
const BAK_EXT: &str = ".bak";
const SCHEMA_VERSION: u32 = 1;
const NAME_FORMAT: &str = "%Y%m%d-%H%M%S";

pub(crate) const STAGING_PREFIX: &str = ".staging-";
pub(crate) const ASIDE_PREFIX: &str = ".aside-";

/// Sidecar stored next to each archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Schema version for migration support
    pub schema_version: u32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub encrypted: bool,
    /// Sum of regular file sizes in the tree
    pub uncompressed_size: u64,
    pub checksums: ChecksumManifest,
}

/// A backup as seen on disk
#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    pub name: String,
    /// Full path to the archive
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Archive size in bytes
    pub size_bytes: u64,
    pub encrypted: bool,
    /// Number of files in the manifest, if the sidecar was readable
    pub file_count: Option<usize>,
}

impl BackupEntry {
    /// Safety backups are never removed by rotation
    pub fn is_safety(&self) -> bool {
        self.name.starts_with(SAFETY_PREFIX)
    }
}

/// Which backups rotation keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Delete non-safety backups older than this
    pub max_age: Option<Duration>,
    /// Keep at most this many non-safety backups
    pub max_count: Option<usize>,
}

impl RotationPolicy {
    pub fn new(max_age: Option<Duration>, max_count: Option<usize>) -> Self {
        Self { max_age, max_count }
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::days(30)),
            max_count: Some(10),
        }
    }
}

/// Outcome of a rotation pass
#[derive(Debug, Clone, Default)]
pub struct RotationReport {
    pub deleted: Vec<String>,
    pub kept: Vec<String>,
    /// Backups that should have been deleted but couldn't be, with the reason
    pub failed: Vec<(String, String)>,
}

impl RotationReport {
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Deleted {} backup(s), kept {}",
            self.deleted.len(),
            self.kept.len()
        );
        if !self.failed.is_empty() {
            summary.push_str(&format!(", {} could not be deleted", self.failed.len()));
        }
        summary
    }
}

/// Creates, lists, rotates and restores configuration tree backups
pub struct BackupManager {
    /// Root of the tree being backed up
    config_dir: PathBuf,
    backup_dir: PathBuf,
    lock_file: PathBuf,
    key_provider: Option<Box<dyn KeyProvider>>,
}

impl BackupManager {
    /// Create a new BackupManager
    ///
    /// With a key provider, new backups are encrypted and encrypted backups
    /// can be restored.
    pub fn new(paths: &NixEnvPaths, key_provider: Option<Box<dyn KeyProvider>>) -> Self {
        Self {
            config_dir: paths.base_dir().to_path_buf(),
            backup_dir: paths.backup_dir(),
            lock_file: paths.lock_file(),
            key_provider,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub(crate) fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Whether new backups will be encrypted
    pub fn encrypts(&self) -> bool {
        self.key_provider.is_some()
    }

    /// Create a backup of the configuration tree
    ///
    /// Without a name the current UTC time (`YYYYMMDD-HHMMSS`) is used. An
    /// existing backup of the same name is only replaced with `force`.
    pub fn create(&self, name: Option<&str>, force: bool) -> NixEnvResult<BackupEntry> {
        self.create_at(name, force, Utc::now())
    }

    pub(crate) fn create_at(
        &self,
        name: Option<&str>,
        force: bool,
        now: DateTime<Utc>,
    ) -> NixEnvResult<BackupEntry> {
        let name = match name {
            Some(name) => name.to_string(),
            None => now.format(NAME_FORMAT).to_string(),
        };
        validate_backup_name(&name)?;

        self.clean_stale();
        self.snapshot(&name, force, now)
    }

    /// Archive the tree under `name`; no stale cleanup so a restore's
    /// staging directory survives the safety backup
    fn snapshot(&self, name: &str, force: bool, now: DateTime<Utc>) -> NixEnvResult<BackupEntry> {
        fs::create_dir_all(&self.backup_dir).map_err(|e| {
            NixEnvError::Io(format!(
                "Failed to create backup directory {}: {}",
                self.backup_dir.display(),
                e
            ))
        })?;

        let existing = self.find(name)?;
        if existing.is_some() && !force {
            return Err(NixEnvError::backup_exists(name));
        }

        let key = self.load_key()?;
        let excludes = self.excludes();
        let checksums = ChecksumManifest::generate(&self.config_dir, &excludes)?;

        let plain_tmp = with_suffix(&self.archive_path(name, false), TMP_EXT);
        let enc_tmp = with_suffix(&self.archive_path(name, true), TMP_EXT);
        let manifest_tmp = with_suffix(&self.manifest_path(name), TMP_EXT);

        let result = (|| -> NixEnvResult<BackupEntry> {
            let file = File::create(&plain_tmp).map_err(|e| {
                NixEnvError::Io(format!("Failed to create {}: {}", plain_tmp.display(), e))
            })?;
            let (writer, stats) = archive::pack(&self.config_dir, BufWriter::new(file), &excludes)?;
            let file = writer.into_inner().map_err(|e| {
                NixEnvError::Io(format!("Failed to flush {}: {}", plain_tmp.display(), e.error()))
            })?;
            file.sync_all().map_err(|e| {
                NixEnvError::Io(format!("Failed to sync {}: {}", plain_tmp.display(), e))
            })?;

            let (staged, final_path) = match &key {
                Some(key) => {
                    encrypt_file(&plain_tmp, &enc_tmp, key)?;
                    fs::remove_file(&plain_tmp)?;
                    (enc_tmp.clone(), self.archive_path(name, true))
                }
                None => (plain_tmp.clone(), self.archive_path(name, false)),
            };

            let metadata = BackupMetadata {
                schema_version: SCHEMA_VERSION,
                name: name.to_string(),
                created_at: now,
                encrypted: key.is_some(),
                uncompressed_size: stats.uncompressed_size,
                checksums,
            };
            write_json_atomic(&manifest_tmp, &metadata)?;

            let previous = commit(&staged, &final_path)?;
            if let Err(e) = atomic_rename(&manifest_tmp, &self.manifest_path(name)) {
                undo_commit(&final_path, previous.as_deref());
                return Err(e);
            }
            if let Some(previous) = previous {
                if let Err(e) = fs::remove_file(&previous) {
                    warn!("Failed to remove {}: {}", previous.display(), e);
                }
            }

            self.entry_for(name, &final_path, Some(&metadata))
        })();

        if result.is_err() {
            for tmp in [&plain_tmp, &enc_tmp, &manifest_tmp] {
                let _ = fs::remove_file(tmp);
            }
        }
        let entry = result?;

        // Replacing a plain backup with an encrypted one (or the reverse)
        if let Some(old) = existing {
            if old.path != entry.path {
                if let Err(e) = fs::remove_file(&old.path) {
                    warn!("Failed to remove replaced archive {}: {}", old.path.display(), e);
                }
            }
        }

        info!(
            "Created backup {} ({} files, {})",
            entry.name,
            entry.file_count.unwrap_or(0),
            if entry.encrypted { "encrypted" } else { "plain" }
        );
        Ok(entry)
    }

    /// Create a backup and then enforce the rotation policy
    pub fn create_with_rotation(
        &self,
        name: Option<&str>,
        force: bool,
        policy: &RotationPolicy,
    ) -> NixEnvResult<(BackupEntry, RotationReport)> {
        let entry = self.create(name, force)?;
        let report = self.rotate(policy)?;
        Ok((entry, report))
    }

    /// Create a `safety-` backup, suffixing `-N` until the name is free
    pub(crate) fn create_safety_backup(&self, now: DateTime<Utc>) -> NixEnvResult<BackupEntry> {
        let base = format!("{}{}", SAFETY_PREFIX, now.format(NAME_FORMAT));
        let mut name = base.clone();
        let mut suffix = 1;
        while self.find(&name)?.is_some() {
            name = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        self.snapshot(&name, false, now)
    }

    /// List all backups, newest first
    pub fn list(&self) -> NixEnvResult<Vec<BackupEntry>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();

        for entry in fs::read_dir(&self.backup_dir).map_err(|e| {
            NixEnvError::Io(format!("Failed to read backup directory: {}", e))
        })? {
            let entry = entry.map_err(|e| {
                NixEnvError::Io(format!("Failed to read directory entry: {}", e))
            })?;

            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let file_name = entry.file_name();
            let Some((name, _)) = file_name.to_str().and_then(parse_archive_name) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            let metadata = self.read_metadata(name);
            backups.push(self.entry_for(name, &entry.path(), metadata.as_ref())?);
        }

        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });

        Ok(backups)
    }

    /// Get a backup by name
    pub fn get(&self, name: &str) -> NixEnvResult<BackupEntry> {
        self.find(name)?
            .ok_or_else(|| NixEnvError::backup_not_found(name))
    }

    /// Get the most recent backup
    pub fn latest(&self) -> NixEnvResult<Option<BackupEntry>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Delete a backup and its sidecar
    pub fn delete(&self, name: &str) -> NixEnvResult<()> {
        let entry = self.get(name)?;
        self.remove_backup(&entry)?;
        info!("Deleted backup {}", name);
        Ok(())
    }

    /// Delete backups that fall outside the policy
    ///
    /// Only non-safety backups count towards `max_count`. Safety backups are
    /// always kept. A backup that can't be deleted is reported in
    /// `failed` and doesn't stop the pass.
    pub fn rotate(&self, policy: &RotationPolicy) -> NixEnvResult<RotationReport> {
        self.rotate_at(policy, Utc::now())
    }

    pub(crate) fn rotate_at(
        &self,
        policy: &RotationPolicy,
        now: DateTime<Utc>,
    ) -> NixEnvResult<RotationReport> {
        let mut report = RotationReport::default();
        let mut rank = 0;

        for backup in self.list()? {
            if backup.is_safety() {
                report.kept.push(backup.name);
                continue;
            }

            rank += 1;
            let over_count = policy.max_count.is_some_and(|max| rank > max);
            let too_old = policy
                .max_age
                .is_some_and(|age| now.signed_duration_since(backup.created_at) > age);

            if !(over_count || too_old) {
                report.kept.push(backup.name);
                continue;
            }

            match self.remove_backup(&backup) {
                Ok(()) => {
                    debug!("Rotated out backup {}", backup.name);
                    report.deleted.push(backup.name);
                }
                Err(e) => {
                    warn!("Failed to delete backup {}: {}", backup.name, e);
                    report.failed.push((backup.name, e.to_string()));
                }
            }
        }

        if !report.deleted.is_empty() {
            info!("Rotation deleted {} backup(s)", report.deleted.len());
        }
        Ok(report)
    }

    /// Encrypt an existing plain backup in place
    pub fn encrypt_backup(&self, name: &str, provider: &dyn KeyProvider) -> NixEnvResult<BackupEntry> {
        let entry = self.get(name)?;
        if entry.encrypted {
            return Err(NixEnvError::Validation(format!(
                "Backup {} is already encrypted",
                name
            )));
        }

        let key = provider.load_key()?;
        let target = self.archive_path(name, true);
        encrypt_file(&entry.path, &target, &key)?;

        if let Err(e) = self.set_metadata_encrypted(name, true) {
            let _ = fs::remove_file(&target);
            return Err(e);
        }
        fs::remove_file(&entry.path).map_err(|e| {
            NixEnvError::Io(format!("Failed to remove {}: {}", entry.path.display(), e))
        })?;

        info!("Encrypted backup {} with {}", name, provider.describe());
        self.get(name)
    }

    /// Decrypt an encrypted backup in place
    ///
    /// Nothing changes on disk if the key doesn't authenticate.
    pub fn decrypt_backup(&self, name: &str, provider: &dyn KeyProvider) -> NixEnvResult<BackupEntry> {
        let entry = self.get(name)?;
        if !entry.encrypted {
            return Err(NixEnvError::Validation(format!(
                "Backup {} is not encrypted",
                name
            )));
        }

        let key = provider.load_key()?;
        let target = self.archive_path(name, false);
        decrypt_file(&entry.path, &target, &key)?;

        if let Err(e) = self.set_metadata_encrypted(name, false) {
            let _ = fs::remove_file(&target);
            return Err(e);
        }
        fs::remove_file(&entry.path).map_err(|e| {
            NixEnvError::Io(format!("Failed to remove {}: {}", entry.path.display(), e))
        })?;

        info!("Decrypted backup {}", name);
        self.get(name)
    }

    /// Copy a backup archive out of the backup directory
    ///
    /// When `dest` is a directory the archive keeps its file name and the
    /// sidecar is copied alongside it.
    pub fn export(&self, name: &str, dest: &Path) -> NixEnvResult<PathBuf> {
        let entry = self.get(name)?;

        if dest.is_dir() {
            let file_name = entry.path.file_name().ok_or_else(|| {
                NixEnvError::Io(format!("Invalid archive path {}", entry.path.display()))
            })?;
            let target = dest.join(file_name);
            atomic_copy(&entry.path, &target)?;

            let sidecar = self.manifest_path(name);
            if sidecar.exists() {
                atomic_copy(&sidecar, &dest.join(format!("{}{}", name, MANIFEST_EXT)))?;
            }
            Ok(target)
        } else {
            atomic_copy(&entry.path, dest)?;
            Ok(dest.to_path_buf())
        }
    }

    /// The sidecar for `name`, if present and readable
    pub fn read_metadata(&self, name: &str) -> Option<BackupMetadata> {
        let path = self.manifest_path(name);
        if !path.exists() {
            return None;
        }
        match read_json(&path) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Ignoring unreadable sidecar {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Load the key for an encrypted backup
    pub(crate) fn require_key(&self, name: &str) -> NixEnvResult<EncryptionKey> {
        match &self.key_provider {
            Some(provider) => provider.load_key(),
            None => Err(NixEnvError::Encryption(format!(
                "Backup {} is encrypted but no key is configured",
                name
            ))),
        }
    }

    /// Paths never captured in a backup nor touched by a restore
    pub(crate) fn excludes(&self) -> Vec<PathBuf> {
        vec![self.backup_dir.clone(), self.lock_file.clone()]
    }

    fn load_key(&self) -> NixEnvResult<Option<EncryptionKey>> {
        self.key_provider.as_ref().map(|p| p.load_key()).transpose()
    }

    fn archive_path(&self, name: &str, encrypted: bool) -> PathBuf {
        let ext = if encrypted { ENCRYPTED_EXT } else { ARCHIVE_EXT };
        self.backup_dir.join(format!("{}{}", name, ext))
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.backup_dir.join(format!("{}{}", name, MANIFEST_EXT))
    }

    fn find(&self, name: &str) -> NixEnvResult<Option<BackupEntry>> {
        validate_backup_name(name)?;
        for encrypted in [true, false] {
            let path = self.archive_path(name, encrypted);
            if path.is_file() {
                let metadata = self.read_metadata(name);
                return self.entry_for(name, &path, metadata.as_ref()).map(Some);
            }
        }
        Ok(None)
    }

    fn entry_for(
        &self,
        name: &str,
        path: &Path,
        metadata: Option<&BackupMetadata>,
    ) -> NixEnvResult<BackupEntry> {
        let fs_meta = fs::metadata(path)
            .map_err(|e| NixEnvError::Io(format!("Failed to stat {}: {}", path.display(), e)))?;

        let created_at = match metadata {
            Some(m) => m.created_at,
            None => fs_meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| DateTime::<Utc>::from(UNIX_EPOCH)),
        };

        Ok(BackupEntry {
            name: name.to_string(),
            path: path.to_path_buf(),
            created_at,
            size_bytes: fs_meta.len(),
            encrypted: path.to_string_lossy().ends_with(ENCRYPTED_EXT),
            file_count: metadata.map(|m| m.checksums.len()),
        })
    }

    fn remove_backup(&self, entry: &BackupEntry) -> NixEnvResult<()> {
        fs::remove_file(&entry.path).map_err(|e| {
            NixEnvError::Io(format!("Failed to delete {}: {}", entry.path.display(), e))
        })?;

        let sidecar = self.manifest_path(&entry.name);
        if sidecar.exists() {
            fs::remove_file(&sidecar).map_err(|e| {
                NixEnvError::Io(format!("Failed to delete {}: {}", sidecar.display(), e))
            })?;
        }
        Ok(())
    }

    fn set_metadata_encrypted(&self, name: &str, encrypted: bool) -> NixEnvResult<()> {
        if let Some(mut metadata) = self.read_metadata(name) {
            metadata.encrypted = encrypted;
            write_json_atomic(self.manifest_path(name), &metadata)?;
        }
        Ok(())
    }

    /// Remove leftovers of interrupted runs
    ///
    /// `.aside-*` directories may hold the only copy of a live tree after a
    /// crash mid-restore, so they are reported and left alone.
    fn clean_stale(&self) {
        let Ok(entries) = fs::read_dir(&self.backup_dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            let result = if is_dir && file_name.starts_with(STAGING_PREFIX) {
                fs::remove_dir_all(&path)
            } else if is_dir && file_name.starts_with(ASIDE_PREFIX) {
                warn!(
                    "Found {} from an interrupted restore; inspect it before deleting",
                    path.display()
                );
                continue;
            } else if !is_dir && file_name.ends_with(TMP_EXT) {
                fs::remove_file(&path)
            } else if !is_dir && is_archive_bak(&file_name) {
                recover_bak(&path)
            } else {
                continue;
            };

            match result {
                Ok(()) => debug!("Removed stale {}", path.display()),
                Err(e) => warn!("Failed to remove stale {}: {}", path.display(), e),
            }
        }
    }
}

/// Check that a backup name is usable
pub fn validate_backup_name(name: &str) -> NixEnvResult<()> {
    validate_name(name)?;
    if name.ends_with(TMP_EXT) {
        return Err(NixEnvError::Validation(format!(
            "Invalid backup name '{}': must not end with {}",
            name, TMP_EXT
        )));
    }
    Ok(())
}

/// Move a fully written archive onto its final name
///
/// Returns the previous archive's `.bak` path when one was replaced; it stays
/// on disk until the sidecar is committed too.
fn commit(staged: &Path, final_path: &Path) -> NixEnvResult<Option<PathBuf>> {
    if final_path.exists() {
        atomic_swap(final_path, staged).map(Some)
    } else {
        atomic_rename(staged, final_path).map(|()| None)
    }
}

/// Take back a committed archive whose sidecar could not be committed
fn undo_commit(final_path: &Path, previous: Option<&Path>) {
    let result = match previous {
        Some(previous) => fs::rename(previous, final_path),
        None => fs::remove_file(final_path),
    };
    if let Err(e) = result {
        warn!("Failed to roll back {}: {}", final_path.display(), e);
    }
}

fn is_archive_bak(file_name: &str) -> bool {
    file_name
        .strip_suffix(BAK_EXT)
        .is_some_and(|archive| parse_archive_name(archive).is_some())
}

/// Deal with `<archive>.bak` left by a crash inside `commit`
///
/// If the archive itself is gone the `.bak` is the only copy and is put back;
/// otherwise it is a superseded version and is removed.
fn recover_bak(bak: &Path) -> std::io::Result<()> {
    let archive = bak.with_extension("");
    if archive.exists() {
        fs::remove_file(bak)
    } else {
        warn!("Recovering {} from {}", archive.display(), bak.display());
        fs::rename(bak, &archive)
    }
}

/// Split an archive file name into backup name and encrypted flag
fn parse_archive_name(file_name: &str) -> Option<(&str, bool)> {
    if let Some(name) = file_name.strip_suffix(ENCRYPTED_EXT) {
        Some((name, true))
    } else {
        file_name.strip_suffix(ARCHIVE_EXT).map(|name| (name, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EphemeralKey;
    use tempfile::TempDir;

    fn create_test_tree() -> (NixEnvPaths, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let paths = NixEnvPaths::with_base_dir(temp_dir.path().join("config"));
        paths.ensure_directories().unwrap();
        fs::write(paths.user_config_file(), "scope: user\n").unwrap();
        fs::write(paths.teams_dir().join("web.yaml"), "scope: team\n").unwrap();
        (paths, temp_dir)
    }

    fn create_test_manager() -> (BackupManager, TempDir) {
        let (paths, temp_dir) = create_test_tree();
        (BackupManager::new(&paths, None), temp_dir)
    }

    fn at(hours_ago: i64) -> DateTime<Utc> {
        Utc::now() - Duration::hours(hours_ago)
    }

    fn names(entries: &[BackupEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn leftover_temps(manager: &BackupManager) -> Vec<String> {
        fs::read_dir(manager.backup_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".tmp") || n.ends_with(".bak"))
            .collect()
    }

    #[test]
    fn test_create_backup() {
        let (manager, _temp) = create_test_manager();

        let entry = manager.create(Some("first"), false).unwrap();

        assert!(entry.path.exists());
        assert!(entry.path.to_string_lossy().ends_with("first.tar.gz"));
        assert!(!entry.encrypted);
        assert_eq!(entry.file_count, Some(2));
        assert!(manager.backup_dir().join("first.manifest.json").exists());
        assert!(leftover_temps(&manager).is_empty());
    }

    #[test]
    fn test_default_name_is_timestamp() {
        let (manager, _temp) = create_test_manager();
        let now = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);

        let entry = manager.create_at(None, false, now).unwrap();
        assert_eq!(entry.name, "20260102-030405");
        assert_eq!(entry.created_at, now);
    }

    #[test]
    fn test_collision_requires_force() {
        let (manager, _temp) = create_test_manager();
        manager.create(Some("daily"), false).unwrap();

        let err = manager.create(Some("daily"), false).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_force_replaces_existing() {
        let (manager, _temp) = create_test_manager();
        let before = manager.create(Some("daily"), false).unwrap();
        let old_digests = manager.read_metadata("daily").unwrap().checksums;

        fs::write(manager.config_dir().join("config.yaml"), "scope: user\nchanged: true\n").unwrap();
        let after = manager.create(Some("daily"), true).unwrap();

        assert_eq!(before.path, after.path);
        assert_ne!(manager.read_metadata("daily").unwrap().checksums, old_digests);
        assert!(leftover_temps(&manager).is_empty());
        assert_eq!(manager.list().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (manager, _temp) = create_test_manager();

        for name in ["", "../escape", "a/b", ".hidden", "partial.tmp"] {
            let err = manager.create(Some(name), false).unwrap_err();
            assert!(err.is_validation(), "{} should be rejected", name);
        }
    }

    #[test]
    fn test_backup_excludes_backup_dir_and_lock() {
        let (paths, _temp) = create_test_tree();
        fs::write(paths.lock_file(), "1\n").unwrap();
        let manager = BackupManager::new(&paths, None);

        manager.create(Some("one"), false).unwrap();
        manager.create(Some("two"), false).unwrap();

        let metadata = manager.read_metadata("two").unwrap();
        assert!(metadata
            .checksums
            .entries
            .iter()
            .all(|e| !e.path.starts_with("backups") && e.path != "nixenv.lock"));
    }

    #[test]
    fn test_list_newest_first_ignoring_temps() {
        let (manager, _temp) = create_test_manager();
        manager.create_at(Some("old"), false, at(2)).unwrap();
        manager.create_at(Some("new"), false, at(0)).unwrap();
        fs::write(manager.backup_dir().join("junk.tar.gz.tmp"), "partial").unwrap();

        let backups = manager.list().unwrap();
        assert_eq!(names(&backups), vec!["new", "old"]);
        assert_eq!(manager.latest().unwrap().unwrap().name, "new");
    }

    #[test]
    fn test_list_without_sidecar_uses_mtime() {
        let (manager, _temp) = create_test_manager();
        manager.create(Some("orphan"), false).unwrap();
        fs::remove_file(manager.backup_dir().join("orphan.manifest.json")).unwrap();

        let backups = manager.list().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].file_count, None);
        assert!(Utc::now().signed_duration_since(backups[0].created_at) < Duration::minutes(5));
    }

    #[test]
    fn test_stale_temps_cleaned_on_create() {
        let (manager, _temp) = create_test_manager();
        let stale = manager.backup_dir().join("crashed.tar.gz.tmp");
        fs::write(&stale, "partial").unwrap();

        manager.create(Some("fresh"), false).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_names_outside_backup_dir_rejected() {
        let (manager, temp) = create_test_manager();
        let outside = temp.path().join("precious.tar.gz");
        fs::write(&outside, "not a backup").unwrap();

        for name in ["../precious", "../../precious", "a/b"] {
            assert!(manager.delete(name).unwrap_err().is_validation(), "{}", name);
            assert!(manager.get(name).unwrap_err().is_validation(), "{}", name);
            assert!(manager.restore(name, true).unwrap_err().is_validation(), "{}", name);
        }
        let out = temp.path().join("out.tar.gz");
        assert!(manager.export("../precious", &out).unwrap_err().is_validation());
        assert!(manager
            .encrypt_backup("../precious", &EphemeralKey::new())
            .unwrap_err()
            .is_validation());

        assert_eq!(fs::read_to_string(&outside).unwrap(), "not a backup");
        assert!(!out.exists());
    }

    #[test]
    fn test_failed_sidecar_commit_keeps_previous_backup() {
        let (manager, _temp) = create_test_manager();
        let original = manager.create(Some("daily"), false).unwrap();
        let original_bytes = fs::read(&original.path).unwrap();

        // A directory squatting on the sidecar name makes its rename fail.
        let sidecar = manager.backup_dir().join("daily.manifest.json");
        fs::remove_file(&sidecar).unwrap();
        fs::create_dir_all(sidecar.join("blocker")).unwrap();

        fs::write(manager.config_dir().join("config.yaml"), "scope: user
changed: true
").unwrap();
        assert!(manager.create(Some("daily"), true).is_err());

        assert_eq!(fs::read(&original.path).unwrap(), original_bytes);
        assert!(leftover_temps(&manager).is_empty());
    }

    #[test]
    fn test_failed_sidecar_commit_leaves_no_new_backup() {
        let (manager, _temp) = create_test_manager();
        fs::create_dir_all(manager.backup_dir().join("fresh.manifest.json").join("blocker"))
            .unwrap();

        assert!(manager.create(Some("fresh"), false).is_err());

        assert!(!manager.backup_dir().join("fresh.tar.gz").exists());
        assert!(manager.list().unwrap().is_empty());
        assert!(leftover_temps(&manager).is_empty());
    }

    #[test]
    fn test_leftover_bak_does_not_block_force() {
        let (manager, _temp) = create_test_manager();
        let entry = manager.create(Some("daily"), false).unwrap();
        fs::copy(&entry.path, with_suffix(&entry.path, ".bak")).unwrap();

        manager.create(Some("daily"), true).unwrap();
        assert!(leftover_temps(&manager).is_empty());
    }

    #[test]
    fn test_orphaned_bak_is_put_back() {
        let (manager, _temp) = create_test_manager();
        let entry = manager.create(Some("daily"), false).unwrap();
        let bytes = fs::read(&entry.path).unwrap();
        fs::rename(&entry.path, with_suffix(&entry.path, ".bak")).unwrap();

        manager.create(Some("other"), false).unwrap();

        assert_eq!(fs::read(&entry.path).unwrap(), bytes);
        assert!(manager.get("daily").is_ok());
        assert!(leftover_temps(&manager).is_empty());
    }

    #[test]
    fn test_rotation_scenario() {
        let (manager, _temp) = create_test_manager();
        manager.create_at(Some("one-hour"), false, at(1)).unwrap();
        manager.create_at(Some("two-hours"), false, at(2)).unwrap();
        manager.create_at(Some("thirty-hours"), false, at(30)).unwrap();
        manager.create_at(Some("safety-five-hours"), false, at(5)).unwrap();

        let policy = RotationPolicy::new(Some(Duration::hours(24)), Some(2));
        let report = manager.rotate_at(&policy, Utc::now()).unwrap();

        assert_eq!(report.deleted, vec!["thirty-hours"]);
        assert!(report.failed.is_empty());
        assert_eq!(
            names(&manager.list().unwrap()),
            vec!["one-hour", "two-hours", "safety-five-hours"]
        );
        assert!(!manager.backup_dir().join("thirty-hours.manifest.json").exists());
    }

    #[test]
    fn test_rotation_never_deletes_safety_backups() {
        for max_count in 0..=4 {
            let (manager, _temp) = create_test_manager();
            manager.create_at(Some("a"), false, at(1)).unwrap();
            manager.create_at(Some("safety-a"), false, at(2)).unwrap();
            manager.create_at(Some("b"), false, at(3)).unwrap();
            manager.create_at(Some("safety-b"), false, at(400)).unwrap();
            manager.create_at(Some("c"), false, at(4)).unwrap();

            let policy = RotationPolicy::new(Some(Duration::hours(24)), Some(max_count));
            manager.rotate_at(&policy, Utc::now()).unwrap();

            let remaining = manager.list().unwrap();
            let safety = remaining.iter().filter(|b| b.is_safety()).count();
            let regular = remaining.len() - safety;
            assert_eq!(safety, 2, "max_count {}", max_count);
            assert_eq!(regular, max_count.min(3), "max_count {}", max_count);
        }
    }

    #[test]
    fn test_rotation_by_age_only() {
        let (manager, _temp) = create_test_manager();
        manager.create_at(Some("recent"), false, at(1)).unwrap();
        manager.create_at(Some("ancient"), false, at(24 * 40)).unwrap();

        let report = manager.rotate(&RotationPolicy::new(Some(Duration::days(30)), None)).unwrap();

        assert_eq!(report.deleted, vec!["ancient"]);
        assert_eq!(report.kept, vec!["recent"]);
        assert!(report.summary().contains("Deleted 1"));
    }

    #[test]
    fn test_create_with_rotation() {
        let (manager, _temp) = create_test_manager();
        manager.create_at(Some("older"), false, at(3)).unwrap();
        manager.create_at(Some("oldest"), false, at(4)).unwrap();

        let policy = RotationPolicy::new(None, Some(1));
        let (entry, report) = manager.create_with_rotation(Some("newest"), false, &policy).unwrap();

        assert_eq!(entry.name, "newest");
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(names(&manager.list().unwrap()), vec!["newest"]);
    }

    #[test]
    fn test_delete() {
        let (manager, _temp) = create_test_manager();
        manager.create(Some("gone"), false).unwrap();

        manager.delete("gone").unwrap();
        assert!(manager.list().unwrap().is_empty());
        assert!(manager.delete("gone").unwrap_err().is_not_found());
    }

    #[test]
    fn test_safety_names_get_suffix_on_collision() {
        let (manager, _temp) = create_test_manager();
        let now = Utc::now();

        let first = manager.create_safety_backup(now).unwrap();
        let second = manager.create_safety_backup(now).unwrap();

        assert!(first.is_safety());
        assert_eq!(second.name, format!("{}-1", first.name));
    }

    #[test]
    fn test_encrypted_create() {
        let (paths, _temp) = create_test_tree();
        let manager = BackupManager::new(&paths, Some(Box::new(EphemeralKey::new())));

        let entry = manager.create(Some("secret"), false).unwrap();

        assert!(entry.encrypted);
        assert!(entry.path.to_string_lossy().ends_with("secret.tar.gz.enc"));
        assert!(!manager.backup_dir().join("secret.tar.gz").exists());
        assert!(manager.read_metadata("secret").unwrap().encrypted);
        assert!(leftover_temps(&manager).is_empty());
    }

    #[test]
    fn test_force_switches_variant() {
        let (paths, _temp) = create_test_tree();
        BackupManager::new(&paths, None).create(Some("nightly"), false).unwrap();

        let encrypting = BackupManager::new(&paths, Some(Box::new(EphemeralKey::new())));
        encrypting.create(Some("nightly"), true).unwrap();

        assert!(!encrypting.backup_dir().join("nightly.tar.gz").exists());
        assert!(encrypting.get("nightly").unwrap().encrypted);
    }

    #[test]
    fn test_encrypt_and_decrypt_existing_backup() {
        let (manager, _temp) = create_test_manager();
        let original = manager.create(Some("plain"), false).unwrap();
        let original_bytes = fs::read(&original.path).unwrap();
        let key = EphemeralKey::new();

        let encrypted = manager.encrypt_backup("plain", &key).unwrap();
        assert!(encrypted.encrypted);
        assert!(!original.path.exists());

        let wrong = EphemeralKey::new();
        assert!(manager.decrypt_backup("plain", &wrong).unwrap_err().is_encryption());
        assert!(encrypted.path.exists());
        assert!(!original.path.exists());

        let decrypted = manager.decrypt_backup("plain", &key).unwrap();
        assert!(!decrypted.encrypted);
        assert_eq!(fs::read(&decrypted.path).unwrap(), original_bytes);
        assert!(!manager.read_metadata("plain").unwrap().encrypted);
    }

    #[test]
    fn test_encrypt_twice_rejected() {
        let (manager, _temp) = create_test_manager();
        manager.create(Some("once"), false).unwrap();
        let key = EphemeralKey::new();

        manager.encrypt_backup("once", &key).unwrap();
        assert!(manager.encrypt_backup("once", &key).unwrap_err().is_validation());
    }

    #[test]
    fn test_export_to_directory() {
        let (manager, temp) = create_test_manager();
        manager.create(Some("shipped"), false).unwrap();
        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();

        let exported = manager.export("shipped", &out).unwrap();

        assert_eq!(exported, out.join("shipped.tar.gz"));
        assert!(out.join("shipped.manifest.json").exists());
    }
}
