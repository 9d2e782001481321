//! nixenv - layered developer-environment configuration
//!
//! This library provides the core of the nixenv tool: configuration
//! documents in three scopes (user, team, project) merged into one active
//! configuration, a package diff against the package manager's installed
//! set, and atomic, verified, optionally encrypted backups of the whole
//! configuration tree.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Path resolution and the settings section type
//! - `error`: Custom error types
//! - `models`: Configuration documents and named sections
//! - `storage`: YAML document store and atomic file primitives
//! - `services`: Inheritance merge and package diff
//! - `crypto`: AES-256-GCM and key providers
//! - `backup`: Backup creation, rotation, verification and restore
//! - `cli`: Command handlers for the `nixenv` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use nixenv::config::NixEnvPaths;
//! use nixenv::services::MergeResolver;
//! use nixenv::storage::ConfigStore;
//!
//! let store = ConfigStore::new(NixEnvPaths::new()?);
//! let active = MergeResolver::new(&store).resolve_user()?;
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

pub use error::{NixEnvError, NixEnvResult};
