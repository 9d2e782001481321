//! Core data models for nixenv
//!
//! Configuration documents and the named-section accessors used by the
//! `config get` / `config set` commands.

pub mod configuration;
pub mod section;

pub use configuration::{BaseRef, Configuration, Metadata, NixConfig, PackageSet, Scope, Script};
pub use section::{section, SectionAccessor, SECTIONS};
