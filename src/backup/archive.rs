//! Gzip-compressed tar packing of the configuration tree
//!
//! Headers are built explicitly per entry so that symlinks are stored as
//! links and permission bits survive the round trip.

use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{NixEnvError, NixEnvResult};

/// Counts collected while packing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
    /// Sum of regular file sizes before compression
    pub uncompressed_size: u64,
}

/// Pack everything under `root` into a tar.gz stream written to `writer`
///
/// Entries are stored relative to `root` in file-name order. Paths in
/// `exclude` and everything below them are left out. Returns the writer
/// after the gzip trailer has been written, so the caller can sync it.
pub fn pack<W: Write>(root: &Path, writer: W, exclude: &[PathBuf]) -> NixEnvResult<(W, ArchiveStats)> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut stats = ArchiveStats::default();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !exclude.iter().any(|x| e.path() == x.as_path()));

    for entry in walker {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| NixEnvError::Io(format!("{} escaped archive root", entry.path().display())))?;
        let metadata = entry.metadata()?;
        let file_type = entry.file_type();

        let mut header = Header::new_gnu();
        header.set_mtime(mtime_of(&metadata));

        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder
                .append_link(&mut header, rel, &target)
                .map_err(|e| archive_error(rel, e))?;
            stats.symlinks += 1;
        } else if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_mode(mode_of(&metadata, 0o755));
            header.set_cksum();
            builder
                .append_data(&mut header, rel, io::empty())
                .map_err(|e| archive_error(rel, e))?;
            stats.dirs += 1;
        } else if file_type.is_file() {
            let mut file = File::open(entry.path())?;
            header.set_entry_type(EntryType::Regular);
            header.set_size(metadata.len());
            header.set_mode(mode_of(&metadata, 0o644));
            header.set_cksum();
            builder
                .append_data(&mut header, rel, &mut file)
                .map_err(|e| archive_error(rel, e))?;
            stats.files += 1;
            stats.uncompressed_size += metadata.len();
        } else {
            debug!("Skipping special file {}", entry.path().display());
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| NixEnvError::Io(format!("Failed to finish archive: {}", e)))?;
    let writer = encoder
        .finish()
        .map_err(|e| NixEnvError::Io(format!("Failed to finish compression: {}", e)))?;

    debug!(
        "Packed {} files, {} dirs, {} symlinks from {}",
        stats.files,
        stats.dirs,
        stats.symlinks,
        root.display()
    );
    Ok((writer, stats))
}

/// Unpack a tar.gz stream into `dest`, returning the number of entries
///
/// Entries that would land outside `dest` are rejected. Directories are
/// created last so restrictive directory modes don't block their contents.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> NixEnvResult<usize> {
    fs::create_dir_all(dest)?;

    let mut archive = Archive::new(GzDecoder::new(reader));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut count = 0;
    {
        let mut directories = Vec::new();
        let entries = archive
            .entries()
            .map_err(|e| NixEnvError::Io(format!("Failed to read archive: {}", e)))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| NixEnvError::Io(format!("Corrupt archive entry: {}", e)))?;
            count += 1;

            if entry.header().entry_type() == EntryType::Directory {
                directories.push(entry);
                continue;
            }
            unpack_entry(&mut entry, dest)?;
        }

        for mut dir in directories {
            unpack_entry(&mut dir, dest)?;
        }
    }

    // Drain past the tar terminator so a missing gzip trailer is reported
    let mut decoder = archive.into_inner();
    io::copy(&mut decoder, &mut io::sink())
        .map_err(|e| NixEnvError::Io(format!("Corrupt archive stream: {}", e)))?;

    Ok(count)
}

fn unpack_entry<R: Read>(entry: &mut tar::Entry<'_, R>, dest: &Path) -> NixEnvResult<()> {
    let path = entry
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "<invalid path>".to_string());

    let unpacked = entry
        .unpack_in(dest)
        .map_err(|e| NixEnvError::Io(format!("Failed to extract {}: {}", path, e)))?;
    if !unpacked {
        return Err(NixEnvError::Validation(format!(
            "Archive entry {} points outside the destination",
            path
        )));
    }
    Ok(())
}

fn archive_error(path: &Path, e: io::Error) -> NixEnvError {
    NixEnvError::Io(format!("Failed to archive {}: {}", path.display(), e))
}

fn mtime_of(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn mode_of(metadata: &Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &Metadata, default: u32) -> u32 {
    if metadata.permissions().readonly() {
        default & !0o222
    } else {
        default
    }
}
