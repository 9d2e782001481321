//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the service layer.

pub mod backup;
pub mod config;
pub mod diff;
pub mod init;

pub use backup::{handle_backup_command, BackupCommands, KeySelection};
pub use config::{handle_config_command, ConfigCommands, Target};
pub use diff::{handle_diff_command, DiffArgs};
pub use init::{handle_init_command, InitArgs};
