//! Configuration document model
//!
//! A configuration is a versioned YAML document living in one scope (user,
//! team or project). The user document is the resolution entry point and may
//! name a team or project document as its `base`.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::settings::Settings;
use crate::error::{NixEnvError, NixEnvResult};

/// Visibility tier of a configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    User,
    Team,
    Project,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Team => "team",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = NixEnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "team" => Ok(Self::Team),
            "project" => Ok(Self::Project),
            other => Err(NixEnvError::Validation(format!(
                "Unknown scope '{}' (expected user, team or project)",
                other
            ))),
        }
    }
}

/// Reference to the configuration a document extends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRef {
    pub scope: Scope,
    pub name: String,
}

impl BaseRef {
    pub fn new(scope: Scope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

impl fmt::Display for BaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.name)
    }
}

impl FromStr for BaseRef {
    type Err = NixEnvError;

    /// Parse `scope:name`, e.g. `team:frontend`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scope, name) = s.split_once(':').ok_or_else(|| {
            NixEnvError::Validation(format!("Invalid base '{}': expected scope:name", s))
        })?;
        let base = Self::new(scope.parse()?, name.trim());
        validate_name(&base.name)?;
        Ok(base)
    }
}

/// Descriptive metadata of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique within the scope
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// A named shell snippet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Multi-line command body, emitted in block-literal style
    pub commands: String,
}

impl Script {
    pub fn new(name: impl Into<String>, commands: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            commands: commands.into(),
        }
    }
}

/// Desired package names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PackageSet {
    #[serde(default)]
    pub core: BTreeSet<String>,

    #[serde(default)]
    pub optional: BTreeSet<String>,
}

impl PackageSet {
    /// Union of core and optional
    pub fn desired(&self) -> HashSet<&str> {
        self.core
            .iter()
            .chain(self.optional.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty() && self.optional.is_empty()
    }
}

/// The package-manager section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NixConfig {
    /// Package-manager identifier (empty = inherit)
    #[serde(default)]
    pub manager: String,

    #[serde(default)]
    pub packages: PackageSet,

    #[serde(default)]
    pub scripts: Vec<Script>,
}

impl NixConfig {
    pub fn script(&self, name: &str) -> Option<&Script> {
        self.scripts.iter().find(|s| s.name == name)
    }
}

/// A configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub scope: Scope,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<BaseRef>,

    pub metadata: Metadata,

    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub nix: NixConfig,
}

impl Configuration {
    /// Create an empty document in a scope
    pub fn new(scope: Scope, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            scope,
            base: None,
            metadata: Metadata {
                name: name.into(),
                description: String::new(),
                created_at: now,
                updated_at: now,
            },
            settings: Settings::default(),
            nix: NixConfig::default(),
        }
    }

    /// Set the base reference (builder style)
    pub fn with_base(mut self, base: BaseRef) -> Self {
        self.base = Some(base);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// `scope:name` identifier used in messages
    pub fn identifier(&self) -> String {
        format!("{}:{}", self.scope, self.metadata.name)
    }

    /// Record a modification
    pub fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }

    /// Validate the document on its own
    ///
    /// Checks the name, the base reference and script-name uniqueness.
    pub fn validate(&self) -> NixEnvResult<()> {
        validate_name(&self.metadata.name)?;

        if let Some(base) = &self.base {
            if base.scope == Scope::User {
                return Err(NixEnvError::Validation(format!(
                    "{} extends a user configuration; base must be team or project",
                    self.identifier()
                )));
            }
            validate_name(&base.name)?;
        }

        for package in self.nix.packages.core.iter().chain(&self.nix.packages.optional) {
            if package.trim().is_empty() {
                return Err(NixEnvError::Validation(format!(
                    "{} lists an empty package name",
                    self.identifier()
                )));
            }
        }

        validate_scripts(&self.nix.scripts).map_err(|msg| {
            NixEnvError::Validation(format!("{}: {}", self.identifier(), msg))
        })
    }
}

/// Check that a document or backup-style name is usable as a file stem
pub fn validate_name(name: &str) -> NixEnvResult<()> {
    if name.trim().is_empty() {
        return Err(NixEnvError::Validation("Name cannot be empty".into()));
    }
    if name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(NixEnvError::Validation(format!(
            "Invalid name '{}': must not contain path separators or start with '.'",
            name
        )));
    }
    Ok(())
}

/// Script names must be non-empty and unique
pub(crate) fn validate_scripts(scripts: &[Script]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for script in scripts {
        if script.name.trim().is_empty() {
            return Err("script with empty name".to_string());
        }
        if !seen.insert(script.name.as_str()) {
            return Err(format!("duplicate script name '{}'", script.name));
        }
    }
    Ok(())
}
