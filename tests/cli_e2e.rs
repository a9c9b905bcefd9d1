//! End-to-end CLI tests for the space-export binary.
//!
//! Only paths that fail before a browser is launched are exercised here.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const VALID_CONFIG: &str = r#"
username: alice
password: s3cret
api_url: https://wiki.example.com
web_url: https://wiki.example.com
space: IPH
download_path: ./out
"#;

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("space-export").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mirror a wiki space"))
        .stdout(predicate::str::contains("--config"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("space-export").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("space-export"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("space-export").unwrap();
    cmd.arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// Without `--config` the binary reads `config.yaml` from the working directory.
#[test]
fn test_binary_missing_default_config_exits_with_failure() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("space-export").unwrap();
    cmd.current_dir(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read config file"))
        .stderr(predicate::str::contains("config.yaml"));
}

#[test]
fn test_binary_missing_explicit_config_exits_with_failure() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("space-export").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("nope.yaml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nope.yaml"));
}

#[test]
fn test_binary_invalid_config_value_exits_with_failure() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(&config, format!("{VALID_CONFIG}max_attempts: 0\n")).unwrap();

    let mut cmd = Command::cargo_bin("space-export").unwrap();
    cmd.arg("-c")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("max_attempts"))
        .stderr(predicate::str::contains("Expected range"));
}

#[test]
fn test_binary_missing_required_field_exits_with_failure() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(&config, "username: alice\npassword: x\n").unwrap();

    let mut cmd = Command::cargo_bin("space-export").unwrap();
    cmd.arg("-c")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid config file"));
}

/// The password must never appear in diagnostics, even at trace level.
#[test]
fn test_binary_does_not_log_password() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(&config, format!("{VALID_CONFIG}max_attempts: 0\n")).unwrap();

    let mut cmd = Command::cargo_bin("space-export").unwrap();
    cmd.arg("-vv")
        .arg("-c")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("s3cret").not());
}
