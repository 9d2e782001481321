//! Package delta between installed and desired sets
//!
//! A flat set difference, not a dependency solve. Anything installed but not
//! desired is scheduled for removal; there is no notion of a protected or
//! manually installed package.

use std::collections::HashSet;

use serde::Serialize;

use crate::models::PackageSet;

/// What has to change to reach the desired set
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PackageDiff {
    /// desired minus installed, sorted
    pub to_install: Vec<String>,
    /// installed minus desired, sorted
    pub to_remove: Vec<String>,
}

impl PackageDiff {
    /// Nothing to install or remove
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_remove.is_empty()
    }

    /// One-line summary for terminal output
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "Packages are up to date".to_string();
        }
        format!(
            "{} to install, {} to remove",
            self.to_install.len(),
            self.to_remove.len()
        )
    }
}

/// Computes package deltas
pub struct PackageDiffEngine;

impl PackageDiffEngine {
    /// Compare installed names against the union of core and optional
    pub fn diff(installed: &[String], desired: &PackageSet) -> PackageDiff {
        let wanted = desired.desired();
        let have: HashSet<&str> = installed.iter().map(String::as_str).collect();

        let mut to_install: Vec<String> = wanted
            .iter()
            .filter(|name| !have.contains(*name))
            .map(|name| name.to_string())
            .collect();
        let mut to_remove: Vec<String> = have
            .iter()
            .filter(|name| !wanted.contains(*name))
            .map(|name| name.to_string())
            .collect();

        to_install.sort();
        to_remove.sort();

        PackageDiff {
            to_install,
            to_remove,
        }
    }
}

/// Parse a package-manager listing: one name per line
///
/// Blank lines and `#` comments are skipped.
pub fn parse_installed(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package_set(core: &[&str], optional: &[&str]) -> PackageSet {
        PackageSet {
            core: core.iter().map(|s| s.to_string()).collect(),
            optional: optional.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_install_and_remove() {
        let desired = package_set(&["git", "curl"], &["ripgrep"]);
        let installed = names(&["git", "htop"]);

        let diff = PackageDiffEngine::diff(&installed, &desired);
        assert_eq!(diff.to_install, names(&["curl", "ripgrep"]));
        assert_eq!(diff.to_remove, names(&["htop"]));
        assert_eq!(diff.summary(), "2 to install, 1 to remove");
    }

    #[test]
    fn test_package_in_core_and_optional_counted_once() {
        let desired = package_set(&["git"], &["git"]);
        let diff = PackageDiffEngine::diff(&[], &desired);
        assert_eq!(diff.to_install, names(&["git"]));
    }

    #[test]
    fn test_diff_converges() {
        let desired = package_set(&["git", "curl", "jq"], &["fd"]);
        let mut installed = names(&["git", "wget"]);

        let first = PackageDiffEngine::diff(&installed, &desired);
        installed.extend(first.to_install.iter().cloned());
        installed.retain(|p| !first.to_remove.contains(p));

        let second = PackageDiffEngine::diff(&installed, &desired);
        assert!(second.to_install.is_empty());
        assert!(second.is_empty());
    }

    #[test]
    fn test_empty_desired_removes_everything() {
        let diff = PackageDiffEngine::diff(&names(&["a", "b"]), &PackageSet::default());
        assert_eq!(diff.to_remove, names(&["a", "b"]));
        assert!(diff.to_install.is_empty());
    }

    #[test]
    fn test_parse_installed() {
        let listing = "git\n\n# comment\n  curl  \n";
        assert_eq!(parse_installed(listing), names(&["git", "curl"]));
    }
}
