//! Storage layer for nixenv
//!
//! Provides YAML document storage with atomic writes and the low-level
//! atomic copy/swap primitives the backup engine builds on.

pub mod atomic;
pub mod config_store;
pub mod file_io;

pub use atomic::{atomic_copy, atomic_rename, atomic_swap};
pub use config_store::ConfigStore;
pub use file_io::{read_json, read_yaml, write_json_atomic, write_yaml_atomic};
