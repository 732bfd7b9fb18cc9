// ABOUTME: Integration tests for the pvelab CLI commands.
// ABOUTME: Validates --help output, init behavior, and argument errors that fail before connecting.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn pvelab_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("pvelab"))
}

#[test]
fn help_shows_commands() {
    pvelab_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("cleanup"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn deploy_help_shows_step_window() {
    pvelab_cmd()
        .args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--start-step"))
        .stdout(predicate::str::contains("--end-step"))
        .stdout(predicate::str::contains("--force"));
}

#[test]
fn init_creates_config_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("lab.yml");

    pvelab_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--name", "homelab", "--host", "admin@pve.lan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lab.yml"));

    assert!(config_path.exists(), "lab.yml should be created");
    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("name: homelab"));
    assert!(content.contains("host: admin@pve.lan:22"));
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("lab.yml");

    fs::write(&config_path, "existing: config").unwrap();

    pvelab_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    assert_eq!(fs::read_to_string(&config_path).unwrap(), "existing: config");
}

#[test]
fn init_force_overwrites() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("lab.yml");
    fs::write(&config_path, "existing: config").unwrap();

    pvelab_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--force"])
        .assert()
        .success();

    assert!(fs::read_to_string(&config_path).unwrap().contains("bootstrap_cache"));
}

#[test]
fn deploy_without_config_fails() {
    let temp_dir = tempfile::tempdir().unwrap();

    pvelab_cmd()
        .current_dir(temp_dir.path())
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn step_window_outside_plan_fails_before_connecting() {
    let temp_dir = tempfile::tempdir().unwrap();
    pvelab_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .success();

    pvelab_cmd()
        .current_dir(temp_dir.path())
        .args(["deploy", "--start-step", "500"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("start step 500 is out of range"));
}

#[test]
fn zero_step_is_rejected_by_parser() {
    pvelab_cmd()
        .args(["deploy", "--start-step", "0"])
        .assert()
        .failure();
}

#[test]
fn json_errors_are_json_lines() {
    let temp_dir = tempfile::tempdir().unwrap();

    pvelab_cmd()
        .current_dir(temp_dir.path())
        .args(["--json", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(r#""event":"error""#));
}
