// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Read-only upstream data: Jira issues, Xray tests and plans, Bitbucket changes
//!
//! The [`Upstream`] trait is the seam to the real services. [`FileUpstream`]
//! serves JSON snapshots laid out as:
//!
//! ```text
//! <root>/jira/issues.json                   {"US-401": {...}} or [{"key": ...}]
//! <root>/xray/test_plans.json               [{"key", "summary", "jira_keys", "tests"}]
//! <root>/xray/tests_by_requirement.json     {"US-401": [{"key", "summary", "steps"}]}
//! <root>/bitbucket/changes_by_jira_key.json {"US-401": [{"file_path", ...}]}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PlanError, PlanResult};

/// Jira issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraIssue {
    /// Issue key
    pub key: String,
    /// Summary
    #[serde(default)]
    pub summary: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Acceptance criteria
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
}

/// Existing Xray test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrayTest {
    /// Test key
    pub key: String,
    /// Summary
    #[serde(default)]
    pub summary: String,
    /// Steps
    #[serde(default)]
    pub steps: Option<String>,
}

/// Bitbucket code change linked to an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChange {
    /// Changed file
    pub file_path: String,
    /// Change summary
    #[serde(default)]
    pub summary: Option<String>,
    /// Diff excerpt
    #[serde(default)]
    pub diff_excerpt: Option<String>,
}

/// Baseline plan record from the Xray catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRecord {
    /// Plan key
    pub key: String,
    /// Summary
    #[serde(default)]
    pub summary: String,
    /// Linked Jira keys
    #[serde(default)]
    pub jira_keys: Vec<String>,
    /// Existing test keys
    #[serde(default)]
    pub tests: Vec<String>,
}

/// Read-only access to Jira, Xray and Bitbucket
#[async_trait]
pub trait Upstream: Send + Sync {
    /// All known Jira issue keys
    async fn issue_keys(&self) -> PlanResult<Vec<String>>;

    /// Baseline plan catalog
    async fn plans(&self) -> PlanResult<Vec<PlanRecord>>;

    /// One Jira issue
    async fn issue(&self, jira_key: &str) -> PlanResult<JiraIssue>;

    /// Xray tests covering a Jira issue (empty when none)
    async fn xray_tests(&self, jira_key: &str) -> PlanResult<Vec<XrayTest>>;

    /// Code changes linked to a Jira issue (empty when none)
    async fn code_changes(&self, jira_key: &str) -> PlanResult<Vec<CodeChange>>;
}

/// Run an upstream future under a time budget
pub async fn guarded<T, F>(dependency: &'static str, budget: Duration, fut: F) -> PlanResult<T>
where
    F: Future<Output = PlanResult<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(dependency, budget_ms = budget.as_millis() as u64, "upstream call timed out");
            Err(PlanError::DependencyTimeout { dependency, budget })
        }
    }
}

/// Candidate lookup keys: the key itself, then the legacy `US-`/`PROJ-` twin
#[must_use]
pub fn key_aliases(jira_key: &str) -> Vec<String> {
    let key = jira_key.trim();
    if key.is_empty() {
        return Vec::new();
    }
    let mut out = vec![key.to_string()];
    if let Some(rest) = key.strip_prefix("US-") {
        out.push(format!("PROJ-{rest}"));
    } else if let Some(rest) = key.strip_prefix("PROJ-") {
        out.push(format!("US-{rest}"));
    }
    out
}

/// Snapshot-file upstream
#[derive(Debug, Clone)]
pub struct FileUpstream {
    root: PathBuf,
}

impl FileUpstream {
    /// Serve snapshots under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Snapshot root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, dependency: &'static str, rel: &str, required: bool) -> PlanResult<Value> {
        let path = self.root.join(rel);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                PlanError::unavailable(dependency, format!("{} is not valid JSON: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::warn!(path = %path.display(), "upstream snapshot missing, treating as empty");
                Ok(Value::Null)
            }
            Err(e) => Err(PlanError::unavailable(
                dependency,
                format!("cannot read {}: {e}", path.display()),
            )),
        }
    }

    async fn by_jira_key(&self, dependency: &'static str, rel: &str, jira_key: &str) -> PlanResult<Vec<Value>> {
        let doc = self.read(dependency, rel, false).await?;
        let Value::Object(map) = doc else {
            return Ok(Vec::new());
        };
        for key in key_aliases(jira_key) {
            if let Some(Value::Array(items)) = map.get(&key) {
                return Ok(items.clone());
            }
        }
        Ok(Vec::new())
    }
}

fn issue_entries(doc: Value) -> Vec<(String, Value)> {
    match doc {
        Value::Object(mut map) => match map.remove("issues") {
            Some(Value::Array(items)) => list_entries(items),
            _ => map
                .into_iter()
                .filter(|(k, _)| k.contains('-'))
                .collect(),
        },
        Value::Array(items) => list_entries(items),
        _ => Vec::new(),
    }
}

fn list_entries(items: Vec<Value>) -> Vec<(String, Value)> {
    items
        .into_iter()
        .filter_map(|item| {
            let key = item.get("key")?.as_str()?.trim().to_string();
            (!key.is_empty()).then_some((key, item))
        })
        .collect()
}

/// Normalize a loosely shaped change record; `None` when it is not an object
fn normalize_change(raw: &Value, idx: usize) -> Option<CodeChange> {
    let obj = raw.as_object()?;
    let text = |field: &str| obj.get(field).and_then(Value::as_str).map(str::trim);
    let file_path = ["file_path", "path", "file"]
        .iter()
        .find_map(|f| text(f).filter(|s| !s.is_empty()))
        .map_or_else(|| format!("UNKNOWN_FILE_{idx:03}"), str::to_string);
    let stringify = |field: &str| match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };
    Some(CodeChange {
        file_path,
        summary: stringify("summary"),
        diff_excerpt: stringify("diff_excerpt"),
    })
}

#[async_trait]
impl Upstream for FileUpstream {
    async fn issue_keys(&self) -> PlanResult<Vec<String>> {
        let doc = self.read("jira", "jira/issues.json", false).await?;
        let mut keys: Vec<String> = issue_entries(doc).into_iter().map(|(k, _)| k).collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn plans(&self) -> PlanResult<Vec<PlanRecord>> {
        let doc = self.read("xray", "xray/test_plans.json", true).await?;
        let Value::Array(items) = doc else {
            return Err(PlanError::unavailable("xray", "test_plans.json must be a list"));
        };
        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<PlanRecord>(item).ok())
            .filter(|p| !p.key.trim().is_empty())
            .collect())
    }

    async fn issue(&self, jira_key: &str) -> PlanResult<JiraIssue> {
        let doc = self.read("jira", "jira/issues.json", true).await?;
        let entries = issue_entries(doc);
        for alias in key_aliases(jira_key) {
            if let Some((key, value)) = entries.iter().find(|(k, _)| *k == alias) {
                let mut issue: JiraIssue = match value {
                    Value::Object(obj) if obj.contains_key("key") => serde_json::from_value(value.clone()),
                    _ => {
                        let mut obj = value.as_object().cloned().unwrap_or_default();
                        obj.insert("key".into(), Value::String(key.clone()));
                        serde_json::from_value(Value::Object(obj))
                    }
                }
                .map_err(|e| PlanError::unavailable("jira", format!("malformed issue {key}: {e}")))?;
                issue.key = jira_key.trim().to_string();
                return Ok(issue);
            }
        }
        Err(PlanError::not_found("jira issue", jira_key))
    }

    async fn xray_tests(&self, jira_key: &str) -> PlanResult<Vec<XrayTest>> {
        let items = self
            .by_jira_key("xray", "xray/tests_by_requirement.json", jira_key)
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<XrayTest>(item).ok())
            .collect())
    }

    async fn code_changes(&self, jira_key: &str) -> PlanResult<Vec<CodeChange>> {
        let items = self
            .by_jira_key("bitbucket", "bitbucket/changes_by_jira_key.json", jira_key)
            .await?;
        Ok(items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| normalize_change(item, idx))
            .collect())
    }
}
