//! Per-file SHA-256 manifests over a directory tree
//!
//! A manifest is generated from the configuration tree when a backup is taken
//! and checked against the unpacked archive before a restore is trusted.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{NixEnvError, NixEnvResult};

/// Digest of one regular file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumEntry {
    /// Lowercase hex SHA-256
    pub sha256: String,
    /// Path relative to the tree root, `/`-separated
    pub path: String,
}

/// Flat list of file digests, sorted by path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChecksumManifest {
    pub entries: Vec<ChecksumEntry>,
}

impl ChecksumManifest {
    /// Walk `root` once and hash every regular file
    ///
    /// Symlinks are not followed and carry no digest. Paths in `exclude`
    /// (and everything below them) are skipped.
    pub fn generate(root: &Path, exclude: &[PathBuf]) -> NixEnvResult<Self> {
        let mut entries = Vec::new();
        if !root.exists() {
            return Ok(Self { entries });
        }

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !exclude.iter().any(|x| e.path() == x.as_path()));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            entries.push(ChecksumEntry {
                sha256: sha256_file(entry.path())?,
                path: relative_path(root, entry.path())?,
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { entries })
    }

    /// Check `root` against this manifest
    ///
    /// Fails with `ChecksumMismatch` naming the first offending file: a
    /// changed digest, a missing file, or a file the manifest doesn't list.
    pub fn verify(&self, root: &Path) -> NixEnvResult<()> {
        let actual = Self::generate(root, &[])?;
        let mut found: BTreeMap<&str, &str> = actual
            .entries
            .iter()
            .map(|e| (e.path.as_str(), e.sha256.as_str()))
            .collect();

        for expected in &self.entries {
            match found.remove(expected.path.as_str()) {
                Some(digest) if digest == expected.sha256 => {}
                Some(digest) => {
                    return Err(NixEnvError::ChecksumMismatch {
                        path: PathBuf::from(&expected.path),
                        expected: expected.sha256.clone(),
                        actual: digest.to_string(),
                    })
                }
                None => {
                    return Err(NixEnvError::ChecksumMismatch {
                        path: PathBuf::from(&expected.path),
                        expected: expected.sha256.clone(),
                        actual: "missing".to_string(),
                    })
                }
            }
        }

        if let Some((path, digest)) = found.into_iter().next() {
            return Err(NixEnvError::ChecksumMismatch {
                path: PathBuf::from(path),
                expected: "absent".to_string(),
                actual: digest.to_string(),
            });
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render in `sha256sum` format (`<digest>  <path>` per line)
    pub fn to_sha256sum(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}  {}\n", e.sha256, e.path))
            .collect()
    }

    /// Parse `sha256sum` output
    pub fn parse_sha256sum(text: &str) -> NixEnvResult<Self> {
        let mut entries = Vec::new();
        for (line_num, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (digest, path) = line.split_once("  ").ok_or_else(|| {
                NixEnvError::Validation(format!("Malformed checksum line {}", line_num + 1))
            })?;
            if digest.len() != 64 || hex::decode(digest).is_err() {
                return Err(NixEnvError::Validation(format!(
                    "Invalid digest on checksum line {}",
                    line_num + 1
                )));
            }
            entries.push(ChecksumEntry {
                sha256: digest.to_ascii_lowercase(),
                path: path.to_string(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { entries })
    }
}

/// Streamed SHA-256 of a file
pub fn sha256_file(path: &Path) -> NixEnvResult<String> {
    let mut file = File::open(path)
        .map_err(|e| NixEnvError::Io(format!("Failed to open {} for hashing: {}", path.display(), e)))?;

    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| NixEnvError::Io(format!("Failed to hash {}: {}", path.display(), e)))?;

    Ok(hex::encode(hasher.finalize()))
}

fn relative_path(root: &Path, path: &Path) -> NixEnvResult<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        NixEnvError::Io(format!(
            "{} is not inside {}",
            path.display(),
            root.display()
        ))
    })?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.yaml"), "scope: user\n").unwrap();
        fs::create_dir_all(temp.path().join("teams")).unwrap();
        fs::write(temp.path().join("teams").join("web.yaml"), "scope: team\n").unwrap();
        temp
    }

    #[test]
    fn test_generate_lists_files_sorted() {
        let tree = create_tree();
        let manifest = ChecksumManifest::generate(tree.path(), &[]).unwrap();

        let paths: Vec<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["config.yaml", "teams/web.yaml"]);
        assert_eq!(manifest.entries[0].sha256.len(), 64);
    }

    #[test]
    fn test_known_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("abc");
        fs::write(&path, "abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_exclude_skips_subtree() {
        let tree = create_tree();
        let backups = tree.path().join("backups");
        fs::create_dir_all(&backups).unwrap();
        fs::write(backups.join("old.tar.gz"), "x").unwrap();

        let manifest = ChecksumManifest::generate(tree.path(), &[backups]).unwrap();
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_verify_detects_modification() {
        let tree = create_tree();
        let manifest = ChecksumManifest::generate(tree.path(), &[]).unwrap();
        assert!(manifest.verify(tree.path()).is_ok());

        fs::write(tree.path().join("teams").join("web.yaml"), "tampered\n").unwrap();
        match manifest.verify(tree.path()).unwrap_err() {
            NixEnvError::ChecksumMismatch { path, .. } => {
                assert_eq!(path, PathBuf::from("teams/web.yaml"))
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_verify_detects_missing_and_extra_files() {
        let tree = create_tree();
        let manifest = ChecksumManifest::generate(tree.path(), &[]).unwrap();

        fs::write(tree.path().join("extra.yaml"), "new\n").unwrap();
        assert!(manifest.verify(tree.path()).unwrap_err().is_checksum_mismatch());

        fs::remove_file(tree.path().join("extra.yaml")).unwrap();
        fs::remove_file(tree.path().join("config.yaml")).unwrap();
        let err = manifest.verify(tree.path()).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_sha256sum_format_round_trip() {
        let tree = create_tree();
        let manifest = ChecksumManifest::generate(tree.path(), &[]).unwrap();

        let text = manifest.to_sha256sum();
        assert!(text.lines().all(|l| l.contains("  ")));
        assert_eq!(ChecksumManifest::parse_sha256sum(&text).unwrap(), manifest);
        assert!(ChecksumManifest::parse_sha256sum("nothex  a\n").is_err());
    }
}
