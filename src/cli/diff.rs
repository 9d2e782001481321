//! Package diff CLI command
//!
//! Compares a package-manager listing against the resolved configuration.
//! nixenv never queries the package manager itself; the listing is read
//! from a file or stdin.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::Args;

use crate::config::paths::NixEnvPaths;
use crate::error::{NixEnvError, NixEnvResult};
use crate::services::{parse_installed, MergeResolver, PackageDiffEngine};
use crate::storage::ConfigStore;

use super::config::Target;

/// Arguments for `nixenv diff`
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// File listing installed packages, one per line ('-' for stdin)
    #[arg(long)]
    pub installed: PathBuf,

    #[command(flatten)]
    pub target: Target,

    /// Print the diff as JSON
    #[arg(long)]
    pub json: bool,
}

/// Handle the diff command
pub fn handle_diff_command(paths: &NixEnvPaths, args: DiffArgs) -> NixEnvResult<()> {
    let store = ConfigStore::new(paths.clone());
    let config = args.target.load(&store)?;
    let resolved = MergeResolver::new(&store).resolve(&config)?;

    let listing = read_listing(&args.installed)?;
    let installed = parse_installed(&listing);
    let diff = PackageDiffEngine::diff(&installed, &resolved.nix.packages);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    for name in &diff.to_install {
        println!("+ {}", name);
    }
    for name in &diff.to_remove {
        println!("- {}", name);
    }
    println!("{}", diff.summary());
    Ok(())
}

fn read_listing(source: &Path) -> NixEnvResult<String> {
    if source.as_os_str() == "-" {
        let mut listing = String::new();
        io::stdin()
            .read_to_string(&mut listing)
            .map_err(|e| NixEnvError::Io(format!("Failed to read stdin: {}", e)))?;
        return Ok(listing);
    }

    fs::read_to_string(source)
        .map_err(|e| NixEnvError::Io(format!("Failed to read {}: {}", source.display(), e)))
}
