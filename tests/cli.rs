use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn nixenv(config_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("nixenv").unwrap();
    cmd.env("NIXENV_CONFIG_DIR", config_dir)
        .env_remove("RUST_LOG")
        .env_remove("NIXENV_PROJECT_DIR")
        .current_dir(config_dir.parent().unwrap());
    cmd
}

fn init_user(config_dir: &Path) {
    nixenv(config_dir).arg("init").assert().success();
}

#[test]
fn test_init_and_show() {
    let temp = TempDir::new().unwrap();
    let config_dir = temp.path().join("config");

    nixenv(&config_dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized user:default"));

    nixenv(&config_dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scope: user"))
        .stdout(predicate::str::contains("manager: nix"));
}

#[test]
fn test_init_twice_requires_force() {
    let temp = TempDir::new().unwrap();
    let config_dir = temp.path().join("config");
    init_user(&config_dir);

    nixenv(&config_dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    nixenv(&config_dir).args(["init", "--force"]).assert().success();
}

#[test]
fn test_set_section_then_diff() {
    let temp = TempDir::new().unwrap();
    let config_dir = temp.path().join("config");
    init_user(&config_dir);

    nixenv(&config_dir)
        .args([
            "config",
            "set",
            "nix",
            "{manager: nix, packages: {core: [git, curl]}}",
        ])
        .assert()
        .success();

    let listing = temp.path().join("installed.txt");
    fs::write(&listing, "git\nhtop\n").unwrap();

    nixenv(&config_dir)
        .args(["diff", "--installed"])
        .arg(&listing)
        .assert()
        .success()
        .stdout(predicate::str::contains("+ curl"))
        .stdout(predicate::str::contains("- htop"))
        .stdout(predicate::str::contains("1 to install, 1 to remove"));
}

#[test]
fn test_diff_reads_stdin() {
    let temp = TempDir::new().unwrap();
    let config_dir = temp.path().join("config");
    init_user(&config_dir);

    nixenv(&config_dir)
        .args(["diff", "--installed", "-", "--json"])
        .write_stdin("htop\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"to_remove\""))
        .stdout(predicate::str::contains("htop"));
}

#[test]
fn test_team_base_resolves() {
    let temp = TempDir::new().unwrap();
    let config_dir = temp.path().join("config");
    init_user(&config_dir);

    nixenv(&config_dir)
        .args(["init", "--scope", "team", "--name", "web"])
        .assert()
        .success();
    nixenv(&config_dir)
        .args([
            "config", "set", "nix", "{packages: {core: [nodejs]}}", "--scope", "team", "--name",
            "web",
        ])
        .assert()
        .success();
    nixenv(&config_dir)
        .args(["init", "--force", "--base", "team:web"])
        .assert()
        .success();

    nixenv(&config_dir)
        .args(["config", "show", "--resolved"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nodejs"));
}

#[test]
fn test_unknown_section_fails() {
    let temp = TempDir::new().unwrap();
    let config_dir = temp.path().join("config");
    init_user(&config_dir);

    nixenv(&config_dir)
        .args(["config", "get", "plugins"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown section"));
}

#[test]
fn test_backup_create_list_restore() {
    let temp = TempDir::new().unwrap();
    let config_dir = temp.path().join("config");
    init_user(&config_dir);
    nixenv(&config_dir)
        .args(["config", "set", "nix", "{packages: {core: [git, curl]}}"])
        .assert()
        .success();

    nixenv(&config_dir)
        .args(["backup", "create", "before-change"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup created: before-change"));

    nixenv(&config_dir)
        .args(["config", "set", "nix", "{packages: {core: [git]}}"])
        .assert()
        .success();

    nixenv(&config_dir)
        .args(["backup", "restore", "latest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Restore complete!"));

    nixenv(&config_dir)
        .args(["config", "get", "nix"])
        .assert()
        .success()
        .stdout(predicate::str::contains("curl"));

    nixenv(&config_dir)
        .args(["backup", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("before-change"))
        .stdout(predicate::str::contains("safety"))
        .stdout(predicate::str::contains("Total: 2 backup(s)"));
}

#[test]
fn test_encrypted_backup_needs_key() {
    let temp = TempDir::new().unwrap();
    let config_dir = temp.path().join("config");
    let key = temp.path().join("backup.key");
    init_user(&config_dir);

    nixenv(&config_dir)
        .args(["backup", "keygen"])
        .arg(&key)
        .assert()
        .success();

    nixenv(&config_dir)
        .args(["backup", "create", "sealed", "--key-file"])
        .arg(&key)
        .assert()
        .success();
    assert!(config_dir.join("backups").join("sealed.tar.gz.enc").exists());

    nixenv(&config_dir)
        .args(["backup", "verify", "sealed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no key is configured"));

    nixenv(&config_dir)
        .args(["backup", "verify", "sealed", "--key-file"])
        .arg(&key)
        .assert()
        .success()
        .stdout(predicate::str::contains("intact"));
}

#[test]
fn test_restore_missing_backup_fails() {
    let temp = TempDir::new().unwrap();
    let config_dir = temp.path().join("config");
    init_user(&config_dir);

    nixenv(&config_dir)
        .args(["backup", "restore", "latest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Backup not found"));
}
