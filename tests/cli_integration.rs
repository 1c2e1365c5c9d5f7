// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Integration tests for the qaplan CLI commands

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;

/// qaplan bound to the workspace data and upstream directories
fn qaplan(ws: &common::Workspace) -> Command {
    let mut cmd = Command::cargo_bin("qaplan").unwrap();
    cmd.env("QAPLAN_DATA_DIR", ws.data_dir())
        .env("QAPLAN_UPSTREAM_DIR", ws.upstream_dir())
        .env_remove("QAPLAN_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--no-color");
    cmd
}

/// Run with `--json` and parse stdout
fn json_output(ws: &common::Workspace, args: &[&str]) -> Value {
    let output = qaplan(ws).arg("--json").args(args).output().unwrap();
    assert!(
        output.status.success(),
        "qaplan {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn write_export(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("export.json");
    std::fs::write(&path, common::scenario_export().to_string()).unwrap();
    path
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("qaplan")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("export-run"))
        .stdout(predicate::str::contains("apply-run"))
        .stdout(predicate::str::contains("effective"));
}

#[test]
fn test_keys_and_plans() {
    let ws = common::Workspace::new();
    qaplan(&ws)
        .arg("keys")
        .assert()
        .success()
        .stdout(predicate::str::contains("US-401"));

    let plans = json_output(&ws, &["plans"]);
    assert_eq!(plans[0]["key"], "PLAN-1");
    assert_eq!(plans[1]["key"], "TP-001");
    assert_eq!(plans[1]["overlay_status"], "NOT_ANALYZED");

    qaplan(&ws)
        .args(["plan", "TP-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("TEST-401-1  User logs in with SSO"));
}

#[test]
fn test_unknown_plan_fails() {
    let ws = common::Workspace::new();
    qaplan(&ws)
        .args(["plan", "NOPE-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("plan not found: NOPE-1"));
}

#[test]
fn test_review_lifecycle() {
    let ws = common::Workspace::new();
    let export = write_export(ws.dir.path());

    qaplan(&ws)
        .args(["export-run", "US-1", "--file"])
        .arg(&export)
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored run for US-1 (2 candidates)"))
        .stdout(predicate::str::contains("Refreshed run-US-1 for: PLAN-1"));

    qaplan(&ws)
        .args(["apply-run", "PLAN-1", "--run", "run-US-1", "--overlay", "F1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Candidates: 2 (2 pending)"));

    qaplan(&ws)
        .args(["decide", "PLAN-1", "--overlay", "F1", "--candidate", "C2", "--decision", "accepted"])
        .assert()
        .success()
        .stdout(predicate::str::contains("C2: ACCEPTED"));

    let effective = json_output(&ws, &["effective", "PLAN-1", "--overlay", "F1"]);
    assert_eq!(effective["tests_to_execute"], serde_json::json!(["T2", "C2"]));
    assert_eq!(effective["tests_excluded"], serde_json::json!(["T1"]));
    assert_eq!(effective["status"], "REVIEW");

    qaplan(&ws)
        .args(["overlays"])
        .assert()
        .success()
        .stdout(predicate::str::contains("run-US-1"))
        .stdout(predicate::str::contains("F1"));

    let runs = json_output(&ws, &["runs"]);
    assert_eq!(runs[0]["jira_key"], "US-1");
}

#[test]
fn test_decision_errors() {
    let ws = common::Workspace::new();
    let export = write_export(ws.dir.path());
    qaplan(&ws).args(["export-run", "US-1", "--file"]).arg(&export).assert().success();

    // decisions need a file overlay
    qaplan(&ws)
        .args(["decide", "PLAN-1", "--overlay", "run-US-1", "--candidate", "C1", "--decision", "ACCEPTED"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected 'file'"));

    qaplan(&ws)
        .args(["apply-run", "PLAN-1", "--run", "run-US-1", "--overlay", "F1"])
        .assert()
        .success();
    qaplan(&ws)
        .args(["decide", "PLAN-1", "--overlay", "F1", "--candidate", "C1", "--decision", "MAYBE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid decision 'MAYBE'"));
}

#[test]
fn test_enrich_and_override() {
    let ws = common::Workspace::new();
    let file = json_output(&ws, &["enrich", "TP-001", "--overlay", "gov"]);
    assert!(file["signals"]
        .as_array()
        .unwrap()
        .contains(&Value::from("skip_count:2")));

    qaplan(&ws)
        .args(["override", "TP-001", "--overlay", "gov", "--test", "TEST-401-2", "--disposition", "execute"])
        .assert()
        .success()
        .stdout(predicate::str::contains("TEST-401-2: Execute (reviewer override)"));

    qaplan(&ws)
        .args(["override", "TP-001", "--overlay", "gov", "--test", "TEST-999-9", "--disposition", "skip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("baseline test not found"));

    qaplan(&ws)
        .args(["effective", "TP-001", "--overlay", "gov"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Excluded (1):"))
        .stdout(predicate::str::contains("US-402"));
}

#[test]
fn test_config_shows_overrides() {
    let ws = common::Workspace::new();
    qaplan(&ws)
        .args(["config", "llm.provider"])
        .assert()
        .success()
        .stdout(predicate::str::diff("mock\n"));

    let config = json_output(&ws, &["config"]);
    assert_eq!(
        config["data_dir"].as_str().map(Path::new),
        Some(ws.data_dir().as_path())
    );
}

#[test]
fn test_completions() {
    Command::cargo_bin("qaplan")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("qaplan"));
}
