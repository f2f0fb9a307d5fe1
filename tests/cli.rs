//! CLI surface tests that need no remote host.
//!
//! Everything behavioral runs against in-crate doubles in the library's
//! unit tests; these only pin down argument parsing, the explicit
//! not-implemented stubs, and config-file failure behavior.

use std::process::{Command, Output};

fn slipway(args: &[&str], cwd: &std::path::Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_slipway"))
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("failed to run slipway")
}

#[test]
fn help_lists_the_release_commands() {
    let dir = tempfile::tempdir().unwrap();
    let out = slipway(&["--help"], dir.path());
    assert!(out.status.success());
    let help = String::from_utf8_lossy(&out.stdout);
    for command in ["stage", "deploy", "cleanup", "reload-last-push", "history"] {
        assert!(help.contains(command), "help is missing '{command}'");
    }
}

#[test]
fn rollback_is_an_explicit_stub() {
    let dir = tempfile::tempdir().unwrap();
    let out = slipway(&["rollback"], dir.path());
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("not implemented"));
}

#[test]
fn fetch_dbdump_is_an_explicit_stub() {
    let dir = tempfile::tempdir().unwrap();
    let out = slipway(&["fetch-dbdump"], dir.path());
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not implemented"));
}

#[test]
fn missing_config_file_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let out = slipway(&["history", "--role", "dev"], dir.path());
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("config file"));
}

#[test]
fn unparsable_config_file_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("deploy.toml"), "[settings\nbroken").unwrap();
    let out = slipway(&["history", "--role", "dev"], dir.path());
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("config file"));
}
