//! Integration tests for the `mu` binary

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Config file pointing artifacts into the temp dir
fn write_config(dir: &Path, tables: &[&str]) -> PathBuf {
    let path = dir.join("metaupdate.yml");
    let tables: Vec<String> = tables.iter().map(|t| format!("  - {}", t)).collect();
    let yaml = format!(
        "coordination:\n  connect-timeout-ms: 2000\n  lock-timeout-ms: 2000\ntables:\n{}\nstorage:\n  artifact-dir: {}\n",
        tables.join("\n"),
        dir.join("artifacts").display()
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

/// `mu` with logs kept inside the temp dir
fn mu(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_mu"));
    cmd.env("XDG_DATA_HOME", dir.join("data"));
    cmd
}

#[test]
fn test_simulate_json_reports_updated() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), &["tableA"]);

    mu(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .args(["simulate", "--nodes", "2", "--tables", "tableA", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"final_state\": \"updated\""))
        .stdout(predicate::str::contains("\"converged\": true"));

    assert!(temp_dir.path().join("artifacts/tableA/typeMetadata.json").exists());
}

#[test]
fn test_simulate_text_with_failure_injection() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), &["tableA", "tableB"]);

    mu(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .args(["simulate", "--nodes", "3", "--fail-first", "--invalidations", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("converged"))
        .stdout(predicate::str::contains("tableA"))
        .stdout(predicate::str::contains("tableB"))
        .stdout(predicate::str::contains("failed=").and(predicate::str::contains("UPDATED")));
}

#[test]
fn test_show_after_simulate() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), &["tableA"]);

    mu(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .args(["simulate", "--nodes", "1"])
        .assert()
        .success();

    mu(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .args(["show", "tableA"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tableA"))
        .stdout(predicate::str::contains("NAME"));

    mu(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .args(["show", "tableA", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"written-at\""));
}

#[test]
fn test_show_unpublished_table_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), &["tableA"]);

    mu(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .args(["show", "tableA"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No artifact published"));
}

#[test]
fn test_config_prints_effective_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), &["tableA"]);

    mu(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("lock-timeout-ms: 2000"))
        .stdout(predicate::str::contains("channel-buffer: 1000"))
        .stdout(predicate::str::contains("tableA"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), &["tableA", "tableA"]);

    mu(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_unknown_format_is_rejected() {
    let temp_dir = TempDir::new().unwrap();

    mu(temp_dir.path())
        .args(["simulate", "--format", "yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown format"));
}

#[test]
fn test_simulate_rejects_path_like_table() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), &["tableA"]);

    mu(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .args(["simulate", "--tables", "a/b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("path separators"));
}
