//! Atomic file operations
//!
//! `rename(2)` is the atomicity boundary for everything nixenv writes: data
//! goes to a sibling temp path first, is synced, and only then renamed onto its
//! final name. The containing directory is synced afterwards so the rename
//! itself survives a crash.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{NixEnvError, NixEnvResult};

/// Rename hook; swapped out in tests to inject failures
pub(crate) type RenameFn<'a> = &'a dyn Fn(&Path, &Path) -> io::Result<()>;

fn os_rename(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)
}

/// `path` with `suffix` appended to its file name (`a.yaml` -> `a.yaml.tmp`)
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Sync a directory so that renames inside it are durable
///
/// Not every platform or filesystem supports syncing directories; failures
/// are ignored.
pub fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        sync_dir(parent);
    }
}

/// Copy `src` onto `dst` so that readers never observe a half-written `dst`
///
/// The temp copy is a hard link when `src` and `dst` share a filesystem and a
/// full byte copy (mode bits preserved) otherwise.
pub fn atomic_copy(src: &Path, dst: &Path) -> NixEnvResult<()> {
    atomic_copy_with(src, dst, &os_rename)
}

pub(crate) fn atomic_copy_with(src: &Path, dst: &Path, rename: RenameFn<'_>) -> NixEnvResult<()> {
    let tmp = with_suffix(dst, ".tmp");

    if tmp.exists() {
        fs::remove_file(&tmp).map_err(|e| {
            NixEnvError::Io(format!("Failed to remove stale {}: {}", tmp.display(), e))
        })?;
    }

    if let Err(link_err) = fs::hard_link(src, &tmp) {
        debug!(
            "Hard link {} -> {} failed ({}), copying bytes",
            src.display(),
            tmp.display(),
            link_err
        );
        fs::copy(src, &tmp).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            NixEnvError::Io(format!(
                "Failed to copy {} to {}: {}",
                src.display(),
                tmp.display(),
                e
            ))
        })?;
        File::open(&tmp)
            .and_then(|f| f.sync_all())
            .map_err(|e| {
                let _ = fs::remove_file(&tmp);
                NixEnvError::Io(format!("Failed to sync {}: {}", tmp.display(), e))
            })?;
    }

    rename(&tmp, dst).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        NixEnvError::Io(format!(
            "Failed to rename {} onto {}: {}",
            tmp.display(),
            dst.display(),
            e
        ))
    })?;

    sync_parent(dst);
    Ok(())
}

/// Commit a fully written temp file under its final name
pub fn atomic_rename(tmp: &Path, dst: &Path) -> NixEnvResult<()> {
    fs::rename(tmp, dst).map_err(|e| {
        NixEnvError::Io(format!(
            "Failed to rename {} onto {}: {}",
            tmp.display(),
            dst.display(),
            e
        ))
    })?;
    sync_parent(dst);
    Ok(())
}

/// Put `new` in place of `old`, keeping the previous `old` at `old.bak`
///
/// Two renames with manual rollback: if moving `new` into place fails, the
/// `.bak` is renamed back so `old` is left as it was. Returns the `.bak`
/// path; the caller removes it once it no longer needs the previous version.
pub fn atomic_swap(old: &Path, new: &Path) -> NixEnvResult<PathBuf> {
    atomic_swap_with(old, new, &os_rename)
}

pub(crate) fn atomic_swap_with(old: &Path, new: &Path, rename: RenameFn<'_>) -> NixEnvResult<PathBuf> {
    let bak = with_suffix(old, ".bak");

    if fs::symlink_metadata(&bak).is_ok() {
        return Err(NixEnvError::Io(format!(
            "Refusing to swap {}: {} already exists",
            old.display(),
            bak.display()
        )));
    }

    rename(old, &bak).map_err(|e| {
        NixEnvError::Io(format!(
            "Failed to move {} aside to {}: {}",
            old.display(),
            bak.display(),
            e
        ))
    })?;

    if let Err(e) = rename(new, old) {
        if let Err(rollback) = rename(&bak, old) {
            warn!(
                "Rollback of {} failed, previous version left at {}: {}",
                old.display(),
                bak.display(),
                rollback
            );
            return Err(NixEnvError::Io(format!(
                "Failed to move {} into place ({}); rollback also failed ({}), previous version at {}",
                new.display(),
                e,
                rollback,
                bak.display()
            )));
        }
        return Err(NixEnvError::Io(format!(
            "Failed to move {} into place at {}: {}",
            new.display(),
            old.display(),
            e
        )));
    }

    sync_parent(old);
    Ok(bak)
}
