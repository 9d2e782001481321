//! Configuration document storage
//!
//! Reads and writes configuration documents by scope and name. Each
//! scope+name pair maps to exactly one YAML file (see `NixEnvPaths::config_file`).

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::paths::NixEnvPaths;
use crate::error::{NixEnvError, NixEnvResult};
use crate::models::{BaseRef, Configuration, Scope};

use super::file_io::{read_yaml, write_yaml_atomic};

/// Default name of the user document
pub const DEFAULT_USER_NAME: &str = "default";

/// Default package-manager identifier written by `init`
pub const DEFAULT_MANAGER: &str = "nix";

/// Loads and saves configuration documents
#[derive(Debug, Clone)]
pub struct ConfigStore {
    paths: NixEnvPaths,
}

impl ConfigStore {
    pub fn new(paths: NixEnvPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &NixEnvPaths {
        &self.paths
    }

    /// File backing a scope+name
    pub fn path_for(&self, scope: Scope, name: &str) -> PathBuf {
        self.paths.config_file(scope, name)
    }

    pub fn exists(&self, scope: Scope, name: &str) -> bool {
        self.path_for(scope, name).exists()
    }

    /// Load and validate a document
    pub fn load(&self, scope: Scope, name: &str) -> NixEnvResult<Configuration> {
        let path = self.path_for(scope, name);
        if !path.exists() {
            return Err(NixEnvError::config_not_found(format!("{}:{}", scope, name)));
        }

        debug!("Loading {} configuration from {}", scope, path.display());
        let config: Configuration = read_yaml(&path)?;

        if config.scope != scope {
            return Err(NixEnvError::Validation(format!(
                "{} declares scope '{}' but is stored as a {} configuration",
                path.display(),
                config.scope,
                scope
            )));
        }

        config.validate()?;
        Ok(config)
    }

    /// Load the user document, the resolution entry point
    pub fn load_user(&self) -> NixEnvResult<Configuration> {
        self.load(Scope::User, DEFAULT_USER_NAME)
    }

    /// Load the document a base reference points at
    pub fn load_base(&self, base: &BaseRef) -> NixEnvResult<Configuration> {
        self.load(base.scope, &base.name)
    }

    /// Validate and persist a document atomically
    pub fn save(&self, config: &Configuration) -> NixEnvResult<PathBuf> {
        config.validate()?;

        let path = self.path_for(config.scope, config.name());
        write_yaml_atomic(&path, config)?;
        debug!("Saved {} to {}", config.identifier(), path.display());
        Ok(path)
    }

    /// Create a fresh document for a scope
    ///
    /// Fails with `AlreadyExists` unless `force` is set.
    pub fn init(
        &self,
        scope: Scope,
        name: &str,
        base: Option<BaseRef>,
        force: bool,
    ) -> NixEnvResult<Configuration> {
        if self.exists(scope, name) && !force {
            return Err(NixEnvError::config_exists(format!("{}:{}", scope, name)));
        }

        let mut config = Configuration::new(scope, name);
        config.base = base;
        if scope == Scope::User {
            config.nix.manager = DEFAULT_MANAGER.to_string();
            self.paths.ensure_directories()?;
        }
        let path = self.save(&config)?;
        info!("Initialized {} at {}", config.identifier(), path.display());
        Ok(config)
    }

    /// Names of the documents stored in a scope, sorted
    pub fn list(&self, scope: Scope) -> NixEnvResult<Vec<String>> {
        if scope == Scope::User {
            return Ok(if self.paths.is_initialized() {
                vec![DEFAULT_USER_NAME.to_string()]
            } else {
                Vec::new()
            });
        }

        let dir = self.paths.scope_dir(scope);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)
            .map_err(|e| NixEnvError::Io(format!("Failed to read {}: {}", dir.display(), e)))?
        {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a document
    pub fn delete(&self, scope: Scope, name: &str) -> NixEnvResult<()> {
        let path = self.path_for(scope, name);
        if !path.exists() {
            return Err(NixEnvError::config_not_found(format!("{}:{}", scope, name)));
        }
        fs::remove_file(&path)
            .map_err(|e| NixEnvError::Io(format!("Failed to delete {}: {}", path.display(), e)))?;
        info!("Deleted {}:{}", scope, name);
        Ok(())
    }
}
