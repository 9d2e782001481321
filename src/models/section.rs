//! Named sections of a configuration document
//!
//! `config get settings` / `config set nix ...` address a document by section
//! name. Each section is registered once in [`SECTIONS`] with a typed getter
//! and setter, so lookups never go through runtime field reflection.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::Value;

use crate::error::{NixEnvError, NixEnvResult};

use super::configuration::{validate_scripts, Configuration, Metadata, NixConfig};
use crate::config::settings::Settings;

type Getter = fn(&Configuration) -> NixEnvResult<Value>;
type Setter = fn(&mut Configuration, Value) -> NixEnvResult<()>;

/// Typed accessor for one named section
pub struct SectionAccessor {
    pub name: &'static str,
    pub description: &'static str,
    get: Getter,
    set: Setter,
}

impl SectionAccessor {
    /// Read the section as a YAML value
    pub fn get(&self, config: &Configuration) -> NixEnvResult<Value> {
        (self.get)(config)
    }

    /// Replace the section from a YAML value and bump `updated_at`
    pub fn set(&self, config: &mut Configuration, value: Value) -> NixEnvResult<()> {
        (self.set)(config, value)?;
        config.touch();
        Ok(())
    }
}

/// All addressable sections
pub static SECTIONS: &[SectionAccessor] = &[
    SectionAccessor {
        name: "metadata",
        description: "name, description and timestamps",
        get: get_metadata,
        set: set_metadata,
    },
    SectionAccessor {
        name: "settings",
        description: "shell, log level and auto-update schedule",
        get: get_settings,
        set: set_settings,
    },
    SectionAccessor {
        name: "nix",
        description: "package manager, packages and scripts",
        get: get_nix,
        set: set_nix,
    },
];

/// Look up a section by name
pub fn section(name: &str) -> NixEnvResult<&'static SectionAccessor> {
    SECTIONS.iter().find(|s| s.name == name).ok_or_else(|| {
        let known: Vec<&str> = SECTIONS.iter().map(|s| s.name).collect();
        NixEnvError::Validation(format!(
            "Unknown section '{}' (known: {})",
            name,
            known.join(", ")
        ))
    })
}

fn to_value<T: Serialize>(section: &T) -> NixEnvResult<Value> {
    Ok(serde_yaml::to_value(section)?)
}

fn from_value<T: DeserializeOwned>(name: &str, value: Value) -> NixEnvResult<T> {
    serde_yaml::from_value(value)
        .map_err(|e| NixEnvError::Validation(format!("Invalid {} section: {}", name, e)))
}

fn get_metadata(config: &Configuration) -> NixEnvResult<Value> {
    to_value(&config.metadata)
}

fn set_metadata(config: &mut Configuration, value: Value) -> NixEnvResult<()> {
    let metadata: Metadata = from_value("metadata", value)?;
    super::configuration::validate_name(&metadata.name)?;
    config.metadata = metadata;
    Ok(())
}

fn get_settings(config: &Configuration) -> NixEnvResult<Value> {
    to_value(&config.settings)
}

fn set_settings(config: &mut Configuration, value: Value) -> NixEnvResult<()> {
    config.settings = from_value::<Settings>("settings", value)?;
    Ok(())
}

fn get_nix(config: &Configuration) -> NixEnvResult<Value> {
    to_value(&config.nix)
}

fn set_nix(config: &mut Configuration, value: Value) -> NixEnvResult<()> {
    let nix: NixConfig = from_value("nix", value)?;
    validate_scripts(&nix.scripts)
        .map_err(|msg| NixEnvError::Validation(format!("Invalid nix section: {}", msg)))?;
    config.nix = nix;
    Ok(())
}
