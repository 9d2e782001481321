//! Inheritance merge of configuration documents
//!
//! Produces the active configuration from the user document and the base it
//! declares. Chains are at most two levels deep (leaf -> base); a base that
//! declares its own base is rejected, which also rules out cycles.

use tracing::debug;

use crate::error::{NixEnvError, NixEnvResult};
use crate::models::configuration::validate_scripts;
use crate::models::{Configuration, NixConfig, Script};
use crate::config::settings::Settings;
use crate::storage::ConfigStore;

/// Resolves a leaf configuration against its base
pub struct MergeResolver<'a> {
    store: &'a ConfigStore,
}

impl<'a> MergeResolver<'a> {
    pub fn new(store: &'a ConfigStore) -> Self {
        Self { store }
    }

    /// Resolve the active configuration for `leaf`
    ///
    /// # Errors
    ///
    /// - `NotFound` if the referenced base does not exist
    /// - `Validation` if the base declares a further base, or if either
    ///   document is malformed
    pub fn resolve(&self, leaf: &Configuration) -> NixEnvResult<Configuration> {
        leaf.validate()?;

        let Some(base_ref) = &leaf.base else {
            return Ok(leaf.clone());
        };

        let base = self.store.load_base(base_ref)?;

        if let Some(further) = &base.base {
            return Err(NixEnvError::Validation(format!(
                "Configuration chain too deep: {} -> {} -> {} (at most one base is supported)",
                leaf.identifier(),
                base_ref,
                further
            )));
        }

        debug!("Merging {} over {}", leaf.identifier(), base_ref);
        merge(&base, leaf)
    }

    /// Load the user document and resolve it
    pub fn resolve_user(&self) -> NixEnvResult<Configuration> {
        let leaf = self.store.load_user()?;
        self.resolve(&leaf)
    }
}

/// Merge an override layer over a base layer
///
/// Scope, base reference and metadata come from the override.
pub fn merge(base: &Configuration, over: &Configuration) -> NixEnvResult<Configuration> {
    let nix = merge_nix(&base.nix, &over.nix);

    validate_scripts(&nix.scripts).map_err(|msg| {
        NixEnvError::Validation(format!(
            "Merged configuration {} is invalid: {}",
            over.identifier(),
            msg
        ))
    })?;

    Ok(Configuration {
        scope: over.scope,
        base: over.base.clone(),
        metadata: over.metadata.clone(),
        settings: merge_settings(&base.settings, &over.settings),
        nix,
    })
}

fn merge_settings(base: &Settings, over: &Settings) -> Settings {
    Settings {
        shell: pick_string(&base.shell, &over.shell),
        log_level: pick_string(&base.log_level, &over.log_level),
        // A boolean has no unset state; the override always decides.
        auto_update: over.auto_update,
        update_interval: if over.update_interval.is_zero() {
            base.update_interval
        } else {
            over.update_interval
        },
    }
}

fn merge_nix(base: &NixConfig, over: &NixConfig) -> NixConfig {
    let mut packages = base.packages.clone();
    packages.core.extend(over.packages.core.iter().cloned());
    packages.optional.extend(over.packages.optional.iter().cloned());

    NixConfig {
        manager: pick_string(&base.manager, &over.manager),
        packages,
        scripts: merge_scripts(&base.scripts, &over.scripts),
    }
}

/// Base order first; an override with a base script's name takes that slot
fn merge_scripts(base: &[Script], over: &[Script]) -> Vec<Script> {
    let mut merged = base.to_vec();
    for script in over {
        match merged.iter().position(|s| s.name == script.name) {
            Some(slot) => merged[slot] = script.clone(),
            None => merged.push(script.clone()),
        }
    }
    merged
}

fn pick_string(base: &str, over: &str) -> String {
    if over.is_empty() {
        base.to_string()
    } else {
        over.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::paths::NixEnvPaths;
    use crate::models::{BaseRef, Scope};
    use std::collections::HashSet;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (ConfigStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let paths = NixEnvPaths::with_base_dir(temp_dir.path().to_path_buf());
        (ConfigStore::new(paths), temp_dir)
    }

    fn team_base() -> Configuration {
        let mut base = Configuration::new(Scope::Team, "web");
        base.settings.shell = "bash".into();
        base.settings.log_level = "info".into();
        base.settings.auto_update = true;
        base.settings.update_interval = Duration::from_secs(86_400);
        base.nix.manager = "nix".into();
        base.nix.packages.core.extend(["git".to_string(), "curl".to_string()]);
        base.nix.packages.optional.insert("ripgrep".into());
        base.nix.scripts = vec![
            Script::new("setup", "echo base setup\n"),
            Script::new("lint", "echo base lint\n"),
        ];
        base
    }

    fn user_leaf() -> Configuration {
        let mut leaf = Configuration::new(Scope::User, "default")
            .with_base(BaseRef::new(Scope::Team, "web"));
        leaf.settings.shell = "zsh".into();
        leaf.nix.packages.core.insert("git".into());
        leaf.nix.packages.core.insert("jq".into());
        leaf.nix.scripts = vec![
            Script::new("deploy", "echo leaf deploy\n"),
            Script::new("setup", "echo leaf setup\n"),
        ];
        leaf
    }

    #[test]
    fn test_leaf_without_base_is_active_configuration() {
        let (store, _temp) = create_test_store();
        let leaf = Configuration::new(Scope::User, "default");

        let resolved = MergeResolver::new(&store).resolve(&leaf).unwrap();
        assert_eq!(resolved, leaf);
    }

    #[test]
    fn test_settings_rules() {
        let merged = merge(&team_base(), &user_leaf()).unwrap();

        assert_eq!(merged.settings.shell, "zsh");
        assert_eq!(merged.settings.log_level, "info");
        // Leaf left auto_update false and that wins over the base's true.
        assert!(!merged.settings.auto_update);
        assert_eq!(merged.settings.update_interval, Duration::from_secs(86_400));
        assert_eq!(merged.nix.manager, "nix");
    }

    #[test]
    fn test_non_zero_interval_overrides() {
        let mut leaf = user_leaf();
        leaf.settings.update_interval = Duration::from_secs(3_600);

        let merged = merge(&team_base(), &leaf).unwrap();
        assert_eq!(merged.settings.update_interval, Duration::from_secs(3_600));
    }

    #[test]
    fn test_packages_are_unioned() {
        let merged = merge(&team_base(), &user_leaf()).unwrap();

        let core: HashSet<&str> = merged.nix.packages.core.iter().map(String::as_str).collect();
        assert_eq!(core, HashSet::from(["git", "curl", "jq"]));
        assert!(merged.nix.packages.optional.contains("ripgrep"));
    }

    #[test]
    fn test_override_script_replaces_base_in_place() {
        let merged = merge(&team_base(), &user_leaf()).unwrap();

        let names: Vec<&str> = merged.nix.scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["setup", "lint", "deploy"]);
        assert_eq!(merged.nix.scripts[0].commands, "echo leaf setup\n");
    }

    #[test]
    fn test_merged_script_names_are_unique() {
        let mut leaf = user_leaf();
        leaf.nix.scripts.push(Script::new("lint", "echo leaf lint\n"));

        let merged = merge(&team_base(), &leaf).unwrap();
        let mut seen = HashSet::new();
        for script in &merged.nix.scripts {
            assert!(seen.insert(script.name.clone()), "duplicate {}", script.name);
        }
        assert_eq!(merged.nix.scripts.len(), 3);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let (store, _temp) = create_test_store();
        store.save(&team_base()).unwrap();
        let leaf = user_leaf();
        let resolver = MergeResolver::new(&store);

        let first = resolver.resolve(&leaf).unwrap();
        let second = resolver.resolve(&leaf).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_yaml::to_string(&first).unwrap(),
            serde_yaml::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_missing_base_is_not_found() {
        let (store, _temp) = create_test_store();
        let err = MergeResolver::new(&store).resolve(&user_leaf()).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("team:web"));
    }

    #[test]
    fn test_chain_deeper_than_two_is_rejected() {
        let (store, _temp) = create_test_store();
        let base = team_base().with_base(BaseRef::new(Scope::Project, "api"));
        store.save(&base).unwrap();
        store.save(&Configuration::new(Scope::Project, "api")).unwrap();

        let err = MergeResolver::new(&store).resolve(&user_leaf()).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("too deep"));
    }

    #[test]
    fn test_resolve_user_from_disk() {
        let (store, _temp) = create_test_store();
        store.save(&team_base()).unwrap();
        store.save(&user_leaf()).unwrap();

        let resolved = MergeResolver::new(&store).resolve_user().unwrap();
        assert_eq!(resolved.scope, Scope::User);
        assert!(resolved.nix.packages.core.contains("curl"));
    }
}
