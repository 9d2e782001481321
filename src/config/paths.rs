//! Path management for nixenv
//!
//! Provides XDG-compliant path resolution for configuration documents and backups.
//!
//! ## Path Resolution Order
//!
//! 1. `NIXENV_CONFIG_DIR` environment variable (if set)
//! 2. The platform config directory (`$XDG_CONFIG_HOME` or `~/.config` on Unix)
//!    joined with `nixenv`
//!
//! Project configurations live outside the tree, under `<project>/.nixenv/`.

use std::path::{Path, PathBuf};

use directories::BaseDirs;

use crate::error::NixEnvError;
use crate::models::Scope;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "NIXENV_CONFIG_DIR";

/// Directory name for project configurations, relative to the project root
pub const PROJECT_CONFIG_DIR: &str = ".nixenv";

/// File name of the advisory "in use" marker
pub const LOCK_FILE_NAME: &str = "nixenv.lock";

/// Manages all paths used by nixenv
#[derive(Debug, Clone)]
pub struct NixEnvPaths {
    /// Base directory for the configuration tree
    base_dir: PathBuf,
    /// Root of the current project
    project_root: PathBuf,
}

impl NixEnvPaths {
    /// Create a new NixEnvPaths instance
    ///
    /// The project root defaults to the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no configuration directory can be determined.
    pub fn new() -> Result<Self, NixEnvError> {
        let base_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(custom) => PathBuf::from(custom),
            None => resolve_default_path()?,
        };

        let project_root = std::env::current_dir().map_err(|e| {
            NixEnvError::Config(format!("Could not determine current directory: {}", e))
        })?;

        Ok(Self {
            base_dir,
            project_root,
        })
    }

    /// Create NixEnvPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        let project_root = base_dir.join("project");
        Self {
            base_dir,
            project_root,
        }
    }

    /// Override the project root
    pub fn with_project_root(mut self, project_root: PathBuf) -> Self {
        self.project_root = project_root;
        self
    }

    /// Get the base directory (~/.config/nixenv/ or equivalent)
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the project root
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Get the user configuration file (~/.config/nixenv/config.yaml)
    pub fn user_config_file(&self) -> PathBuf {
        self.base_dir.join("config.yaml")
    }

    /// Get the team configuration directory (~/.config/nixenv/teams/)
    pub fn teams_dir(&self) -> PathBuf {
        self.base_dir.join("teams")
    }

    /// Get the project configuration directory (<project>/.nixenv/)
    pub fn project_config_dir(&self) -> PathBuf {
        self.project_root.join(PROJECT_CONFIG_DIR)
    }

    /// Get the backup directory (~/.config/nixenv/backups/)
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Get the advisory lock marker
    pub fn lock_file(&self) -> PathBuf {
        self.base_dir.join(LOCK_FILE_NAME)
    }

    /// Location of a configuration document by scope and name
    ///
    /// The user scope has exactly one document, so `name` is ignored there.
    pub fn config_file(&self, scope: Scope, name: &str) -> PathBuf {
        match scope {
            Scope::User => self.user_config_file(),
            Scope::Team => self.teams_dir().join(format!("{}.yaml", name)),
            Scope::Project => self.project_config_dir().join(format!("{}.yaml", name)),
        }
    }

    /// Directory holding the documents of a scope
    pub fn scope_dir(&self, scope: Scope) -> PathBuf {
        match scope {
            Scope::User => self.base_dir.clone(),
            Scope::Team => self.teams_dir(),
            Scope::Project => self.project_config_dir(),
        }
    }

    /// Ensure all required directories exist
    ///
    /// Creates:
    /// - Base directory (~/.config/nixenv/)
    /// - Teams directory (~/.config/nixenv/teams/)
    /// - Backup directory (~/.config/nixenv/backups/)
    pub fn ensure_directories(&self) -> Result<(), NixEnvError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| NixEnvError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.teams_dir())
            .map_err(|e| NixEnvError::Io(format!("Failed to create teams directory: {}", e)))?;

        std::fs::create_dir_all(self.backup_dir())
            .map_err(|e| NixEnvError::Io(format!("Failed to create backup directory: {}", e)))?;

        Ok(())
    }

    /// Check if nixenv has been initialized (user config exists)
    pub fn is_initialized(&self) -> bool {
        self.user_config_file().exists()
    }
}

/// Resolve the default configuration directory based on platform
fn resolve_default_path() -> Result<PathBuf, NixEnvError> {
    let dirs = BaseDirs::new()
        .ok_or_else(|| NixEnvError::Config("Could not determine home directory".into()))?;
    Ok(dirs.config_dir().join("nixenv"))
}
