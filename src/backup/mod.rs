//! Backup system for nixenv
//!
//! Snapshots the whole configuration tree, rotates old snapshots and restores
//! them with verification.
//!
//! # Architecture
//!
//! - `BackupManager`: creates, lists, rotates, encrypts, verifies and
//!   restores backups
//! - `archive`: tar + gzip packing of the tree (symlinks kept as links)
//! - `checksum`: per-file SHA-256 manifests
//! - `lock`: advisory lock marker gating restore
//!
//! # Backup Format
//!
//! Each backup is two files in `<config>/backups/`:
//! - `<name>.tar.gz` (or `<name>.tar.gz.enc`, AES-256-GCM with the nonce in
//!   front of the ciphertext)
//! - `<name>.manifest.json`: creation time, encryption flag and the checksum
//!   manifest
//!
//! The backup directory and the lock marker are never part of an archive.
//!
//! # Retention Policy
//!
//! By default rotation keeps backups younger than 30 days, at most 10 of
//! them. Backups named `safety-*` (taken automatically before a restore)
//! are never rotated out.
//!
//! # Example
//!
//! ```rust,ignore
//! use nixenv::backup::{BackupManager, RotationPolicy};
//! use nixenv::config::NixEnvPaths;
//!
//! let paths = NixEnvPaths::new()?;
//! let manager = BackupManager::new(&paths, None);
//!
//! let entry = manager.create(None, false)?;
//! manager.rotate(&RotationPolicy::default())?;
//!
//! // Later
//! let report = manager.restore(&entry.name, false)?;
//! println!("{}", report.summary());
//! ```

pub mod archive;
pub mod checksum;
pub mod lock;
mod manager;
mod restore;

pub use checksum::{ChecksumEntry, ChecksumManifest};
pub use lock::LockMarker;
pub use manager::{
    validate_backup_name, BackupEntry, BackupManager, BackupMetadata, RotationPolicy,
    RotationReport, SAFETY_PREFIX,
};
pub use restore::{RestoreReport, VerificationReport};
