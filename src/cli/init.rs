//! Init CLI command

use clap::Args;

use crate::config::paths::NixEnvPaths;
use crate::error::NixEnvResult;
use crate::models::BaseRef;
use crate::storage::ConfigStore;

use super::config::Target;

/// Arguments for `nixenv init`
#[derive(Args, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub target: Target,

    /// Base configuration to inherit from, as scope:name
    #[arg(long)]
    pub base: Option<BaseRef>,

    /// Overwrite an existing document
    #[arg(short, long)]
    pub force: bool,
}

/// Handle the init command
pub fn handle_init_command(paths: &NixEnvPaths, args: InitArgs) -> NixEnvResult<()> {
    let store = ConfigStore::new(paths.clone());
    let name = args.target.resolve_name()?;

    let config = store.init(args.target.scope, &name, args.base, args.force)?;
    let path = store.path_for(config.scope, config.name());

    println!("Initialized {} at {}", config.identifier(), path.display());
    if let Some(base) = &config.base {
        println!("Inherits from {}", base);
    }
    println!();
    println!("Run 'nixenv config show --resolved' to see the active configuration.");
    Ok(())
}
