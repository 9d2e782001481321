//! Configuration module for nixenv
//!
//! This module provides:
//! - XDG-compliant path resolution
//! - The settings section type and its duration format

pub mod paths;
pub mod settings;

pub use paths::NixEnvPaths;
pub use settings::Settings;
