//! CLI integration tests

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Command running in an empty directory, isolated from user config
fn conform(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("conform").unwrap();
    cmd.current_dir(dir.path()).env("HOME", dir.path()).arg("--no-color");
    cmd
}

#[test]
fn test_rules_json() {
    let dir = tempdir().unwrap();
    conform(&dir)
        .args(["rules", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_rules\": 11"))
        .stdout(predicate::str::contains("\"id\": \"string-interpolation\""));
}

#[test]
fn test_scan_clean_file() {
    let dir = tempdir().unwrap();
    conform(&dir)
        .arg("scan")
        .arg(fixture("clean.asthra"))
        .arg("--strict")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 file scanned, 0 with violations"));
}

#[test]
fn test_scan_strict_fails_on_violations() {
    let dir = tempdir().unwrap();
    conform(&dir)
        .arg("scan")
        .arg(fixture("violations.asthra"))
        .args(["--strict", "--no-metrics"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("error[empty-params]"));

    assert!(!dir.path().join(".conform").exists());
}

#[test]
fn test_scan_json_output() {
    let dir = tempdir().unwrap();
    let output = conform(&dir)
        .arg("scan")
        .arg(fixture("violations.asthra"))
        .args(["--format", "json", "--no-metrics"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["total_issues"], 6);
    assert_eq!(json["diagnostics"][0]["rule_id"], "empty-params");
}

#[test]
fn test_fix_records_metrics() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("violations.asthra");
    fs::copy(fixture("violations.asthra"), &source).unwrap();

    conform(&dir)
        .arg("scan")
        .arg(&source)
        .args(["--fix", "all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4 fixes applied, 0 failed"));

    let content = fs::read_to_string(&source).unwrap();
    assert!(content.contains("fn run(none) -> void {"));
    assert!(dir
        .path()
        .join(".conform/metrics/latest_metrics.json")
        .exists());

    conform(&dir)
        .arg("metrics")
        .assert()
        .success()
        .stdout(predicate::str::contains("## Compliance Summary"))
        .stdout(predicate::str::contains("## Performance Metrics"));
}

#[test]
fn test_dry_run_with_report_file() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("violations.asthra");
    fs::copy(fixture("violations.asthra"), &source).unwrap();
    let original = fs::read_to_string(&source).unwrap();
    let report = dir.path().join("report.md");

    conform(&dir)
        .arg("scan")
        .arg(&source)
        .args(["--fix", "all", "--dry-run", "--diff", "--report"])
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("4 fixes would be applied (dry run)"))
        .stdout(predicate::str::contains("+fn helper(none) -> i32 {"));

    assert_eq!(fs::read_to_string(&source).unwrap(), original);
    assert!(fs::read_to_string(&report)
        .unwrap()
        .starts_with("# Conformance Report"));
}

#[test]
fn test_suggestions_export() {
    let dir = tempdir().unwrap();
    conform(&dir)
        .arg("suggestions")
        .arg(fixture("violations.asthra"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_suggestions\": 6"));
}

#[test]
fn test_missing_metrics_is_fatal() {
    let dir = tempdir().unwrap();
    conform(&dir)
        .arg("metrics")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no metrics recorded"));
}

#[test]
fn test_unmatched_path_is_fatal() {
    let dir = tempdir().unwrap();
    conform(&dir)
        .args(["scan", "does/not/exist.asthra"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error"));
}
