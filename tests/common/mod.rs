// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Shared fixtures: upstream snapshots and a service over a temp directory

#![allow(dead_code)]

use qaplan::config::Config;
use qaplan::llm::MockGenerator;
use qaplan::service::PlanService;
use qaplan::upstream::FileUpstream;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, value: &Value) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Write Jira/Xray/Bitbucket snapshots under `root`
pub fn write_upstream(root: &Path) {
    write(
        root,
        "jira/issues.json",
        &json!({
            "US-1": {"summary": "Checkout", "description": "Pay for a basket"},
            "US-401": {
                "summary": "Login with SSO",
                "description": "Users sign in through the corporate IdP",
                "acceptance_criteria": "Redirects back to the portal"
            },
            "US-402": {"summary": "Logout", "description": "Session is closed"}
        }),
    );
    write(
        root,
        "xray/test_plans.json",
        &json!([
            {"key": "PLAN-1", "summary": "Checkout plan", "jira_keys": ["US-1"], "tests": ["T1", "T2"]},
            {
                "key": "TP-001",
                "summary": "Login plan",
                "jira_keys": ["US-401", "US-402"],
                "tests": ["TEST-401-1", "TEST-401-2", "TEST-401-3"]
            }
        ]),
    );
    write(
        root,
        "xray/tests_by_requirement.json",
        &json!({
            "US-1": [
                {"key": "T1", "summary": "Pay by card"},
                {"key": "T2", "summary": "Pay by voucher"}
            ],
            "US-401": [
                {"key": "TEST-401-1", "summary": "User logs in with SSO"},
                {"key": "TEST-401-3", "summary": "Legacy login", "steps": "outdated flow"}
            ],
            "US-402": []
        }),
    );
    write(
        root,
        "bitbucket/changes_by_jira_key.json",
        &json!({
            "US-401": [{"file_path": "src/auth/sso.rs", "summary": "SSO callback"}]
        }),
    );
}

/// Temp workspace with `upstream/` snapshots and an empty `data/` directory
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        write_upstream(&dir.path().join("upstream"));
        Self { dir }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn upstream_dir(&self) -> PathBuf {
        self.dir.path().join("upstream")
    }

    pub fn config(&self) -> Config {
        Config {
            data_dir: self.data_dir(),
            upstream_dir: Some(self.upstream_dir()),
            lock_wait_ms: 2_000,
            ..Config::default()
        }
    }

    pub fn service(&self) -> Arc<PlanService> {
        Arc::new(PlanService::new(
            self.config(),
            Arc::new(FileUpstream::new(self.upstream_dir())),
            Arc::new(MockGenerator),
        ))
    }
}

/// Export body with one suggestion mapped to `T1` and one new test
pub fn scenario_export() -> Value {
    json!({
        "markdown": "# Checkout plan",
        "suggestions": [
            {"candidate_key": "C1", "title": "Card payment declined", "priority": "HIGH",
             "type": "functional", "mapped_existing_test_key": "T1"},
            {"candidate_key": "C2", "title": "Voucher expired", "priority": "MEDIUM", "type": "regression"}
        ],
        "provider": "mock"
    })
}
