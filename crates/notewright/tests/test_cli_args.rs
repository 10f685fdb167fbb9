//! CLI argument parsing tests for notewright

use assert_cmd::Command;
use predicates::prelude::*;

fn notewright() -> Command {
    Command::new(env!("CARGO_BIN_EXE_notewright"))
}

#[test]
fn test_help_flag() {
    notewright()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("An AI assistant for your markdown notes"))
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_version_flag() {
    notewright()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_no_args_shows_usage() {
    notewright()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_subcommands_listed() {
    let output = notewright().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["init", "setup", "run", "modes", "status"] {
        assert!(stdout.contains(name), "missing {} in {}", name, stdout);
    }
}

#[test]
fn test_run_help() {
    notewright()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run a task against the note workspace"))
        .stdout(predicate::str::contains("-m, --message"))
        .stdout(predicate::str::contains("--mode"))
        .stdout(predicate::str::contains("-w, --workspace"))
        .stdout(predicate::str::contains("-n, --note"))
        .stdout(predicate::str::contains("-y, --yes"));
}

#[test]
fn test_init_help() {
    notewright()
        .args(["init", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialize"));
}

#[test]
fn test_unknown_subcommand() {
    notewright()
        .arg("engage")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_verbose_is_global() {
    notewright()
        .args(["modes", "--verbose"])
        .assert()
        .success();
}
