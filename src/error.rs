//! Custom error types for nixenv
//!
//! This module defines the error hierarchy for the application using thiserror
//! for ergonomic error definitions. Callers distinguish "nothing to do"
//! (`NotFound`, `AlreadyExists`) from integrity problems (`ChecksumMismatch`,
//! `Encryption`) by matching on the variant.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for nixenv operations
#[derive(Error, Debug)]
pub enum NixEnvError {
    /// Configuration-related errors (paths, environment)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// YAML serialization/deserialization errors
    #[error("YAML error: {0}")]
    Yaml(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Malformed configuration, chain-depth violation, duplicate script names
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Name collision without force
    #[error("{entity_type} already exists: {identifier}")]
    AlreadyExists {
        entity_type: &'static str,
        identifier: String,
    },

    /// A file's digest did not match the manifest
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Encryption errors (bad key length, authentication failure)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// The configuration tree is marked as in use
    #[error("Configuration tree is locked: {0}")]
    Locked(String),
}

impl NixEnvError {
    /// Create a "not found" error for configurations
    pub fn config_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Configuration",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for backups
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create an "already exists" error for backups
    pub fn backup_exists(identifier: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create an "already exists" error for configurations
    pub fn config_exists(identifier: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity_type: "Configuration",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is an "already exists" error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a checksum mismatch
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }

    /// Check if this is an encryption error
    pub fn is_encryption(&self) -> bool {
        matches!(self, Self::Encryption(_))
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for NixEnvError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for NixEnvError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

impl From<serde_json::Error> for NixEnvError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<walkdir::Error> for NixEnvError {
    fn from(err: walkdir::Error) -> Self {
        let path = err
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Self::Io(format!("Failed to walk {}: {}", path, err))
    }
}

/// Result type alias for nixenv operations
pub type NixEnvResult<T> = Result<T, NixEnvError>;
