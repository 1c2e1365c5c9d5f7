// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Exported generation runs and the prompt archive

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use walkdir::WalkDir;

use super::{read_json, validate_segment, write_json_atomic, OverlayStore};
use crate::error::PlanResult;
use crate::types::Provenance;

const RUN_SUFFIX: &str = ".run.json";

/// `sha256:<hex>` digest of a text
#[must_use]
pub fn sha256_text(text: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(text.as_bytes())))
}

/// One exported generation run, as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDocument {
    /// Jira key the run was generated for
    pub jira_key: String,
    /// Generation time
    pub generated_at: DateTime<Utc>,
    /// Prompt/schema provenance
    #[serde(default)]
    pub provenance: Provenance,
    /// Human-readable plan
    #[serde(default)]
    pub markdown: String,
    /// Raw suggestion objects, validated when reconciled
    #[serde(default)]
    pub suggestions: Vec<Value>,
    /// Context the generator saw, if exported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_context: Option<Value>,
}

/// Listing entry for stored runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Jira key
    pub jira_key: String,
    /// Generation time
    pub generated_at: DateTime<Utc>,
    /// Prompt hash
    pub prompt_hash: String,
    /// Number of raw suggestions
    pub suggestions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchivedPrompt {
    prompt_id: String,
    prompt_hash: String,
    created_at: DateTime<Utc>,
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PromptRecord {
    prompt_id: String,
    created_at: DateTime<Utc>,
    file: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PromptRegistry {
    #[serde(default)]
    latest: BTreeMap<String, String>,
    #[serde(default)]
    prompts: BTreeMap<String, PromptRecord>,
}

impl OverlayStore {
    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn run_path(&self, jira_key: &str) -> PathBuf {
        self.runs_dir().join(format!("{jira_key}{RUN_SUFFIX}"))
    }

    fn prompts_dir(&self) -> PathBuf {
        self.root.join("prompts")
    }

    /// Stored run for a Jira key
    pub fn load_run(&self, jira_key: &str) -> PlanResult<Option<RunDocument>> {
        validate_segment("jira key", jira_key)?;
        read_json(&self.run_path(jira_key))
    }

    /// Replace the run for its Jira key; returns the document it replaced
    pub async fn save_run(&self, doc: &RunDocument) -> PlanResult<Option<RunDocument>> {
        validate_segment("jira key", &doc.jira_key)?;
        let _guard = self
            .run_locks
            .lock(doc.jira_key.clone(), self.lock_wait)
            .await
            .map_err(|_| self.busy("runs", &doc.jira_key))?;
        let previous = self.load_run(&doc.jira_key)?;
        write_json_atomic(&self.run_path(&doc.jira_key), doc)?;
        tracing::info!(
            jira_key = %doc.jira_key,
            overwrote = previous.is_some(),
            prompt_hash = %doc.provenance.prompt_hash,
            "run document saved"
        );
        Ok(previous)
    }

    /// All stored runs, by Jira key
    pub fn list_runs(&self) -> PlanResult<Vec<RunSummary>> {
        let dir = self.runs_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| crate::error::PlanError::Storage(e.to_string()))?;
            let name = entry.file_name().to_string_lossy();
            if !entry.file_type().is_file() || !name.ends_with(RUN_SUFFIX) {
                continue;
            }
            match read_json::<RunDocument>(entry.path()) {
                Ok(Some(doc)) => out.push(RunSummary {
                    jira_key: doc.jira_key,
                    generated_at: doc.generated_at,
                    prompt_hash: doc.provenance.prompt_hash,
                    suggestions: doc.suggestions.len(),
                }),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable run"),
            }
        }
        out.sort_by(|a, b| a.jira_key.cmp(&b.jira_key));
        Ok(out)
    }

    /// Archive prompt text under its hash; returns `sha256:<hex>`
    pub async fn archive_prompt(&self, prompt_id: &str, text: &str) -> PlanResult<String> {
        let hash = sha256_text(text);
        let hex_part = hash.trim_start_matches("sha256:").to_string();
        let file = format!("{hex_part}.json");
        let _guard = self.acquire(self.prompt_lock.clone(), "*", "prompts").await?;

        let path = self.prompts_dir().join(&file);
        if !path.exists() {
            let archived = ArchivedPrompt {
                prompt_id: prompt_id.to_string(),
                prompt_hash: hash.clone(),
                created_at: Utc::now(),
                text: text.to_string(),
            };
            write_json_atomic(&path, &archived)?;
        }

        let registry_path = self.prompts_dir().join("registry.json");
        let mut registry: PromptRegistry = read_json(&registry_path)?.unwrap_or_default();
        let changed = registry.latest.get(prompt_id) != Some(&hash) || !registry.prompts.contains_key(&hash);
        if changed {
            registry.latest.insert(prompt_id.to_string(), hash.clone());
            registry.prompts.entry(hash.clone()).or_insert_with(|| PromptRecord {
                prompt_id: prompt_id.to_string(),
                created_at: Utc::now(),
                file,
            });
            write_json_atomic(&registry_path, &registry)?;
            tracing::debug!(prompt_id, prompt_hash = %hash, "prompt archived");
        }
        Ok(hash)
    }

    /// Archived prompt text for a hash
    pub fn archived_prompt(&self, prompt_hash: &str) -> PlanResult<Option<String>> {
        let hex_part = prompt_hash.trim_start_matches("sha256:");
        if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(None);
        }
        let doc: Option<ArchivedPrompt> = read_json(&self.prompts_dir().join(format!("{hex_part}.json")))?;
        Ok(doc.map(|d| d.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn doc(jira_key: &str, n: usize) -> RunDocument {
        RunDocument {
            jira_key: jira_key.into(),
            generated_at: Utc::now(),
            provenance: Provenance {
                prompt_hash: sha256_text("p"),
                ..Provenance::default()
            },
            markdown: "# plan".into(),
            suggestions: (0..n).map(|i| serde_json::json!({"title": format!("t{i}")})).collect(),
            raw_context: None,
        }
    }

    #[test]
    fn test_sha256_text() {
        assert_eq!(
            sha256_text("abc"),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_save_reports_previous() {
        let dir = TempDir::new().unwrap();
        let store = OverlayStore::new(dir.path(), Duration::from_millis(200));
        assert!(store.save_run(&doc("US-401", 1)).await.unwrap().is_none());
        let previous = store.save_run(&doc("US-401", 3)).await.unwrap().unwrap();
        assert_eq!(previous.suggestions.len(), 1);
        assert_eq!(store.load_run("US-401").unwrap().unwrap().suggestions.len(), 3);
    }

    #[tokio::test]
    async fn test_run_locks_are_separate_from_overlay_locks() {
        let dir = TempDir::new().unwrap();
        let store = OverlayStore::new(dir.path(), Duration::from_millis(200));
        // an overlay named after a jira key on a plan keyed "runs"
        let _held = store.lock("runs", "US-401").await.unwrap();
        assert!(store.save_run(&doc("US-401", 1)).await.is_ok());

        let _run = store.run_locks.lock("US-401".to_string(), store.lock_wait).await.unwrap();
        let err = store.save_run(&doc("US-401", 2)).await.unwrap_err();
        assert_eq!(err.kind(), "OverlayBusyError");
    }

    #[tokio::test]
    async fn test_list_runs_sorted() {
        let dir = TempDir::new().unwrap();
        let store = OverlayStore::new(dir.path(), Duration::from_millis(200));
        store.save_run(&doc("US-402", 2)).await.unwrap();
        store.save_run(&doc("US-401", 1)).await.unwrap();
        std::fs::write(dir.path().join("runs/notes.txt"), "ignored").unwrap();
        let runs = store.list_runs().unwrap();
        let keys: Vec<_> = runs.iter().map(|r| r.jira_key.as_str()).collect();
        assert_eq!(keys, vec!["US-401", "US-402"]);
        assert_eq!(runs[1].suggestions, 2);
    }

    #[tokio::test]
    async fn test_prompt_archive_is_content_addressed() {
        let dir = TempDir::new().unwrap();
        let store = OverlayStore::new(dir.path(), Duration::from_millis(200));
        let a = store.archive_prompt("test_plan", "system\n\nuser").await.unwrap();
        let b = store.archive_prompt("test_plan", "system\n\nuser").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.archived_prompt(&a).unwrap().as_deref(), Some("system\n\nuser"));
        assert!(store.archived_prompt("sha256:../../etc").unwrap().is_none());
    }
}
