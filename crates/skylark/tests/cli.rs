// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line integration tests against the built binary.

use std::path::Path;
use std::process::{Command, Output};

fn skylark(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_skylark"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run skylark binary")
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("skylark.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn check_accepts_valid_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("history.db");
    let config = write_config(
        dir.path(),
        &format!("[storage]\ndatabase_path = {:?}\n", db.to_string_lossy()),
    );

    let output = skylark(&config, &["check"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("configuration ok"));
}

#[test]
fn check_rejects_unknown_keys() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path(), "[sync]\npage_sise = 10\n");

    let output = skylark(&config, &["check"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn history_on_empty_database() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("history.db");
    let config = write_config(
        dir.path(),
        &format!("[storage]\ndatabase_path = {:?}\n", db.to_string_lossy()),
    );

    let output = skylark(
        &config,
        &["history", "count", "--account", "me@example.org", "--peer", "alice@example.org"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "0");

    let output = skylark(&config, &["history", "unread"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}
