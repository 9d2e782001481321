use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nixenv::cli::{
    handle_backup_command, handle_config_command, handle_diff_command, handle_init_command,
    BackupCommands, ConfigCommands, DiffArgs, InitArgs, KeySelection,
};
use nixenv::config::NixEnvPaths;
use nixenv::storage::ConfigStore;

#[derive(Parser)]
#[command(
    name = "nixenv",
    version,
    about = "Layered developer-environment configuration with verified backups",
    long_about = "nixenv keeps user, team and project environment configurations \
                  as YAML documents, merges them into one active configuration, \
                  diffs it against what the package manager has installed, and \
                  snapshots the whole configuration tree into atomic, optionally \
                  encrypted backups."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root for project-scoped configurations
    #[arg(long, global = true, env = "NIXENV_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Key file used to encrypt and decrypt backups
    #[arg(long, global = true, conflicts_with = "keyring")]
    key_file: Option<PathBuf>,

    /// Use the key stored in the system keyring
    #[arg(long, global = true)]
    keyring: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a configuration document
    Init(InitArgs),

    /// Inspect and edit configuration documents
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Compare installed packages against the active configuration
    Diff(DiffArgs),

    /// Backup management commands
    #[command(subcommand)]
    Backup(BackupCommands),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut paths = NixEnvPaths::new()?;
    if let Some(project_dir) = &cli.project_dir {
        paths = paths.with_project_root(project_dir.clone());
    }

    init_logging(cli.verbose, &paths);

    let keys = KeySelection {
        key_file: cli.key_file,
        keyring: cli.keyring,
    };

    match cli.command {
        Some(Commands::Init(args)) => handle_init_command(&paths, args)?,
        Some(Commands::Config(cmd)) => handle_config_command(&paths, cmd)?,
        Some(Commands::Diff(args)) => handle_diff_command(&paths, args)?,
        Some(Commands::Backup(cmd)) => handle_backup_command(&paths, &keys, cmd)?,
        None => {
            println!("nixenv - layered developer-environment configuration");
            println!();
            println!("Run 'nixenv --help' for usage information.");
            println!("Run 'nixenv init' to create your user configuration.");
        }
    }

    Ok(())
}

/// `RUST_LOG` wins, then `--verbose`, then the user document's log level
fn init_logging(verbose: bool, paths: &NixEnvPaths) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose {
            "debug".to_string()
        } else {
            configured_log_level(paths).unwrap_or_else(|| "warn".to_string())
        };
        EnvFilter::new(format!("nixenv={}", level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn configured_log_level(paths: &NixEnvPaths) -> Option<String> {
    let level = ConfigStore::new(paths.clone())
        .load_user()
        .ok()?
        .settings
        .log_level;
    (!level.trim().is_empty()).then_some(level)
}
