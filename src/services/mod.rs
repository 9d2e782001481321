//! Service layer for nixenv
//!
//! Configuration resolution and package diffing. Both are pure with respect
//! to the package manager: installed packages are supplied by the caller.

pub mod merge;
pub mod package_diff;

pub use merge::{merge, MergeResolver};
pub use package_diff::{parse_installed, PackageDiff, PackageDiffEngine};
