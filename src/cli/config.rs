//! Configuration CLI commands
//!
//! Implements `config path|show|get|set|validate`, addressing documents by
//! scope and name and sections by their registered name.

use clap::{Args, Subcommand};

use crate::config::paths::NixEnvPaths;
use crate::error::{NixEnvError, NixEnvResult};
use crate::models::{section, Configuration, Scope, SECTIONS};
use crate::services::MergeResolver;
use crate::storage::config_store::DEFAULT_USER_NAME;
use crate::storage::ConfigStore;

/// Which configuration document a command addresses
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Configuration scope (user, team, project)
    #[arg(long, default_value = "user")]
    pub scope: Scope,

    /// Document name (required for team and project scopes)
    #[arg(long)]
    pub name: Option<String>,
}

impl Target {
    /// Document name, defaulting to the single user document
    pub fn resolve_name(&self) -> NixEnvResult<String> {
        match (&self.name, self.scope) {
            (Some(name), _) => Ok(name.clone()),
            (None, Scope::User) => Ok(DEFAULT_USER_NAME.to_string()),
            (None, scope) => Err(NixEnvError::Validation(format!(
                "--name is required for {} configurations",
                scope
            ))),
        }
    }

    pub fn load(&self, store: &ConfigStore) -> NixEnvResult<Configuration> {
        store.load(self.scope, &self.resolve_name()?)
    }
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show configuration paths
    Path,

    /// Print a configuration document
    Show {
        #[command(flatten)]
        target: Target,

        /// Print the document merged with its base
        #[arg(long)]
        resolved: bool,
    },

    /// Print one section of a document
    Get {
        /// Section name (metadata, settings, nix)
        section: String,

        #[command(flatten)]
        target: Target,
    },

    /// Replace one section of a document with a YAML value
    Set {
        /// Section name (metadata, settings, nix)
        section: String,

        /// New section contents as YAML
        value: String,

        #[command(flatten)]
        target: Target,
    },

    /// Check a document and its base chain
    Validate {
        #[command(flatten)]
        target: Target,
    },
}

/// Handle a config command
pub fn handle_config_command(paths: &NixEnvPaths, cmd: ConfigCommands) -> NixEnvResult<()> {
    let store = ConfigStore::new(paths.clone());

    match cmd {
        ConfigCommands::Path => {
            println!("nixenv Configuration");
            println!("====================");
            println!("Config directory:  {}", paths.base_dir().display());
            println!("User config:       {}", paths.user_config_file().display());
            println!("Teams directory:   {}", paths.teams_dir().display());
            println!("Project directory: {}", paths.project_config_dir().display());
            println!("Backup directory:  {}", paths.backup_dir().display());
            println!(
                "Initialized:       {}",
                if paths.is_initialized() { "yes" } else { "no" }
            );
        }

        ConfigCommands::Show { target, resolved } => {
            let config = target.load(&store)?;
            let config = if resolved {
                MergeResolver::new(&store).resolve(&config)?
            } else {
                config
            };
            print!("{}", serde_yaml::to_string(&config)?);
        }

        ConfigCommands::Get { section: name, target } => {
            let config = target.load(&store)?;
            let value = section(&name)?.get(&config)?;
            print!("{}", serde_yaml::to_string(&value)?);
        }

        ConfigCommands::Set {
            section: name,
            value,
            target,
        } => {
            let accessor = section(&name)?;
            let value: serde_yaml::Value = serde_yaml::from_str(&value)
                .map_err(|e| NixEnvError::Validation(format!("Invalid YAML value: {}", e)))?;

            let mut config = target.load(&store)?;
            accessor.set(&mut config, value)?;
            let path = store.save(&config)?;
            println!("Updated {} in {}", accessor.name, path.display());
        }

        ConfigCommands::Validate { target } => {
            let config = target.load(&store)?;
            let resolved = MergeResolver::new(&store).resolve(&config)?;
            println!("{} is valid", config.identifier());
            if let Some(base) = &config.base {
                println!("  base: {}", base);
            }
            println!(
                "  packages: {} core, {} optional",
                resolved.nix.packages.core.len(),
                resolved.nix.packages.optional.len()
            );
            println!("  scripts: {}", resolved.nix.scripts.len());
            println!();
            println!("Sections:");
            for s in SECTIONS {
                println!("  {:<10} {}", s.name, s.description);
            }
        }
    }

    Ok(())
}
