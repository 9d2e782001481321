//! Backup CLI commands
//!
//! Implements CLI commands for backup management.

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::Subcommand;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::backup::{BackupEntry, BackupManager, RotationPolicy};
use crate::config::paths::NixEnvPaths;
use crate::config::settings::parse_duration;
use crate::crypto::{FileKey, KeyProvider, SystemKeyring};
use crate::error::{NixEnvError, NixEnvResult};

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a new backup
    Create {
        /// Backup name (defaults to the current UTC time)
        name: Option<String>,

        /// Replace an existing backup with the same name
        #[arg(short, long)]
        force: bool,

        /// Apply the default rotation policy afterwards
        #[arg(long)]
        rotate: bool,
    },

    /// List all available backups
    List {
        /// Also show archive paths
        #[arg(short, long)]
        long: bool,
    },

    /// Restore from a backup
    Restore {
        /// Backup name (use 'latest' for most recent)
        backup: String,

        /// Skip the safety backup and ignore the lock marker
        #[arg(short, long)]
        force: bool,
    },

    /// Delete backups outside the retention policy
    Rotate {
        /// Maximum age, e.g. 30d or 12h
        #[arg(long, default_value = "30d")]
        max_age: String,

        /// Maximum number of regular backups to keep
        #[arg(long, default_value_t = 10)]
        max_count: usize,
    },

    /// Delete a backup
    Delete {
        /// Backup name
        backup: String,
    },

    /// Check a backup against its manifest without restoring it
    Verify {
        /// Backup name (use 'latest' for most recent)
        backup: String,
    },

    /// Encrypt an existing backup with the selected key
    Encrypt {
        /// Backup name
        backup: String,
    },

    /// Decrypt an encrypted backup with the selected key
    Decrypt {
        /// Backup name
        backup: String,
    },

    /// Copy a backup archive out of the backup directory
    Export {
        /// Backup name (use 'latest' for most recent)
        backup: String,

        /// Destination file or directory
        dest: PathBuf,
    },

    /// Generate a new random key file
    Keygen {
        /// Where to write the key
        path: PathBuf,

        /// Also store the key in the system keyring
        #[arg(long)]
        store_in_keyring: bool,
    },
}

/// Where the backup key comes from, chosen by global flags
#[derive(Debug, Clone, Default)]
pub struct KeySelection {
    pub key_file: Option<PathBuf>,
    pub keyring: bool,
}

impl KeySelection {
    /// Build the selected provider, if any
    pub fn provider(&self) -> Option<Box<dyn KeyProvider>> {
        match (&self.key_file, self.keyring) {
            (Some(path), _) => Some(Box::new(FileKey::new(path))),
            (None, true) => Some(Box::new(SystemKeyring::default())),
            (None, false) => None,
        }
    }

    fn require(&self) -> NixEnvResult<Box<dyn KeyProvider>> {
        self.provider().ok_or_else(|| {
            NixEnvError::Validation("No key selected: pass --key-file <path> or --keyring".into())
        })
    }
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Files")]
    files: String,
    #[tabled(rename = "Flags")]
    flags: String,
}

impl From<&BackupEntry> for BackupRow {
    fn from(entry: &BackupEntry) -> Self {
        let mut flags = Vec::new();
        if entry.encrypted {
            flags.push("encrypted");
        }
        if entry.is_safety() {
            flags.push("safety");
        }

        Self {
            name: entry.name.clone(),
            created: entry.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            age: format_age(Utc::now().signed_duration_since(entry.created_at)),
            size: format_size(entry.size_bytes),
            files: entry
                .file_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
            flags: flags.join(", "),
        }
    }
}

/// Handle a backup command
pub fn handle_backup_command(
    paths: &NixEnvPaths,
    keys: &KeySelection,
    cmd: BackupCommands,
) -> NixEnvResult<()> {
    let manager = BackupManager::new(paths, keys.provider());

    match cmd {
        BackupCommands::Create {
            name,
            force,
            rotate,
        } => {
            let entry = if rotate {
                let (entry, report) =
                    manager.create_with_rotation(name.as_deref(), force, &RotationPolicy::default())?;
                println!("{}", report.summary());
                entry
            } else {
                manager.create(name.as_deref(), force)?
            };
            println!("Backup created: {}", entry.name);
            println!("Location: {}", entry.path.display());
        }

        BackupCommands::List { long } => {
            let backups = manager.list()?;

            if backups.is_empty() {
                println!("No backups found.");
                println!("Create one with: nixenv backup create");
                return Ok(());
            }

            let rows: Vec<BackupRow> = backups.iter().map(BackupRow::from).collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{}", table);

            if long {
                println!();
                for backup in &backups {
                    println!("{}: {}", backup.name, backup.path.display());
                }
            }

            println!();
            println!("Total: {} backup(s)", backups.len());
        }

        BackupCommands::Restore { backup, force } => {
            let name = resolve_backup_name(&manager, &backup)?;
            let report = manager.restore(&name, force)?;

            println!("Restore complete!");
            println!("{}", report.summary());
            if let Some(safety) = &report.safety_backup {
                println!("Undo with: nixenv backup restore {}", safety);
            }
        }

        BackupCommands::Rotate { max_age, max_count } => {
            let policy = RotationPolicy::new(Some(parse_max_age(&max_age)?), Some(max_count));
            let report = manager.rotate(&policy)?;

            for name in &report.deleted {
                println!("Deleted {}", name);
            }
            for (name, reason) in &report.failed {
                eprintln!("Could not delete {}: {}", name, reason);
            }
            println!("{}", report.summary());
        }

        BackupCommands::Delete { backup } => {
            manager.delete(&backup)?;
            println!("Deleted backup {}", backup);
        }

        BackupCommands::Verify { backup } => {
            let name = resolve_backup_name(&manager, &backup)?;
            let report = manager.verify(&name)?;
            println!("{}", report.summary());
        }

        BackupCommands::Encrypt { backup } => {
            let provider = keys.require()?;
            let entry = manager.encrypt_backup(&backup, provider.as_ref())?;
            println!("Encrypted {} -> {}", entry.name, entry.path.display());
        }

        BackupCommands::Decrypt { backup } => {
            let provider = keys.require()?;
            let entry = manager.decrypt_backup(&backup, provider.as_ref())?;
            println!("Decrypted {} -> {}", entry.name, entry.path.display());
        }

        BackupCommands::Export { backup, dest } => {
            let name = resolve_backup_name(&manager, &backup)?;
            let target = manager.export(&name, &dest)?;
            println!("Exported {} to {}", name, target.display());
        }

        BackupCommands::Keygen {
            path,
            store_in_keyring,
        } => {
            generate_key(&path, store_in_keyring)?;
        }
    }

    Ok(())
}

fn generate_key(path: &Path, store_in_keyring: bool) -> NixEnvResult<()> {
    let provider = FileKey::generate(path)?;
    println!("Key written to {}", provider.path().display());

    if store_in_keyring {
        let keyring = SystemKeyring::default();
        keyring.store_key(&provider.load_key()?)?;
        println!("Key stored in {}", keyring.describe());
    }

    println!("Keep a copy somewhere safe: encrypted backups cannot be restored without it.");
    Ok(())
}

/// Resolve a backup identifier, handling the "latest" keyword
fn resolve_backup_name(manager: &BackupManager, backup: &str) -> NixEnvResult<String> {
    if backup.eq_ignore_ascii_case("latest") {
        return manager
            .latest()?
            .map(|b| b.name)
            .ok_or_else(|| NixEnvError::backup_not_found("latest"));
    }
    Ok(manager.get(backup)?.name)
}

fn parse_max_age(input: &str) -> NixEnvResult<chrono::Duration> {
    let age = parse_duration(input)?;
    chrono::Duration::from_std(age)
        .map_err(|_| NixEnvError::Validation(format!("Maximum age out of range: {}", input)))
}

/// Format an age in human-readable form
fn format_age(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    format!("{}mo", days / 30)
}

/// Format a file size in human-readable form
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
