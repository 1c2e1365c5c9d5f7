// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Overlay store
//!
//! Layout under the data directory:
//!
//! ```text
//! overlays/registry.json            name -> {kind, label, created_at}
//! overlays/<name>/<plan_key>.json   one Overlay document
//! runs/<jira_key>.run.json          exported generation runs
//! prompts/registry.json             prompt archive index
//! prompts/<hex>.json                archived prompt text
//! ```
//!
//! A name is bound to one kind the first time it is written, and the binding
//! is checked again under the registry lock right before every write. Writes
//! to the same `(plan_key, name)` are serialized by a per-key lock with a
//! bounded wait; run documents use their own lock namespace. Every document
//! is replaced atomically (write temp file, rename).

mod locks;
mod runs;

pub use runs::{sha256_text, RunDocument, RunSummary};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use locks::{KeyedGuard, KeyedLocks};

use crate::error::{PlanError, PlanResult};
use crate::types::{Overlay, OverlayKind, OverlayPayload, OverlaySummary};

/// Registry entry binding an overlay name to its kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Bound kind
    pub kind: OverlayKind,
    /// Display label
    pub label: String,
    /// First write
    pub created_at: DateTime<Utc>,
}

type Registry = BTreeMap<String, RegistryEntry>;

/// File-backed overlay store
pub struct OverlayStore {
    root: PathBuf,
    lock_wait: Duration,
    overlay_locks: KeyedLocks<(String, String)>,
    run_locks: KeyedLocks<String>,
    registry_lock: Arc<tokio::sync::Mutex<()>>,
    prompt_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Reject empty keys and anything that could escape the store directory
pub fn validate_segment(what: &str, value: &str) -> PlanResult<()> {
    let ok = !value.is_empty()
        && value.len() <= 128
        && !value.starts_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(PlanError::InvalidInput(format!(
            "{what} '{value}' must be 1-128 characters of [A-Za-z0-9._-] and not start with '.'"
        )))
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> PlanResult<Option<T>> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PlanError::Storage(format!("failed to parse {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PlanError::Storage(format!("failed to read {}: {e}", path.display()))),
    }
}

/// Replace `path` with `value` in one rename so readers never see half a document
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PlanResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| PlanError::Storage(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(parent)
        .map_err(|e| PlanError::Storage(format!("failed to create {}: {e}", parent.display())))?;

    let json = serde_json::to_string_pretty(value)?;
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = parent.join(tmp_name);
    fs::write(&tmp, json).map_err(|e| PlanError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PlanError::Storage(format!("failed to replace {}: {e}", path.display()))
    })
}

impl OverlayStore {
    /// Store rooted at the data directory
    pub fn new(root: impl Into<PathBuf>, lock_wait: Duration) -> Self {
        Self {
            root: root.into(),
            lock_wait,
            overlay_locks: KeyedLocks::new(),
            run_locks: KeyedLocks::new(),
            registry_lock: Arc::new(tokio::sync::Mutex::new(())),
            prompt_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Data directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn registry_path(&self) -> PathBuf {
        self.root.join("overlays").join("registry.json")
    }

    fn overlay_path(&self, name: &str, plan_key: &str) -> PathBuf {
        self.root.join("overlays").join(name).join(format!("{plan_key}.json"))
    }

    fn registry(&self) -> PlanResult<Registry> {
        Ok(read_json(&self.registry_path())?.unwrap_or_default())
    }

    fn busy(&self, plan_key: &str, name: &str) -> PlanError {
        tracing::warn!(plan_key, overlay = name, wait_ms = self.lock_wait.as_millis() as u64, "overlay lock wait exceeded");
        PlanError::Busy {
            plan_key: plan_key.to_string(),
            name: name.to_string(),
        }
    }

    async fn acquire(
        &self,
        lock: Arc<tokio::sync::Mutex<()>>,
        plan_key: &str,
        name: &str,
    ) -> PlanResult<OwnedMutexGuard<()>> {
        tokio::time::timeout(self.lock_wait, lock.lock_owned())
            .await
            .map_err(|_| self.busy(plan_key, name))
    }

    /// Exclusive lock for one `(plan_key, name)`
    async fn lock(&self, plan_key: &str, name: &str) -> PlanResult<KeyedGuard<'_, (String, String)>> {
        self.overlay_locks
            .lock((plan_key.to_string(), name.to_string()), self.lock_wait)
            .await
            .map_err(|_| self.busy(plan_key, name))
    }

    /// Bind `name` to `kind` if unbound; fails with `KindConflict` when it
    /// is already bound to the other kind
    async fn bind(&self, name: &str, kind: OverlayKind, label: Option<&str>) -> PlanResult<RegistryEntry> {
        let _guard = self.acquire(self.registry_lock.clone(), "*", name).await?;
        let mut registry = self.registry()?;
        if let Some(entry) = registry.get(name) {
            if entry.kind != kind {
                return Err(PlanError::KindConflict {
                    name: name.to_string(),
                    existing: entry.kind,
                    requested: kind,
                });
            }
            let mut entry = entry.clone();
            if let Some(label) = label.filter(|l| *l != entry.label) {
                entry.label = label.to_string();
                registry.insert(name.to_string(), entry.clone());
                write_json_atomic(&self.registry_path(), &registry)?;
            }
            return Ok(entry);
        }
        let entry = RegistryEntry {
            kind,
            label: label.unwrap_or(name).to_string(),
            created_at: Utc::now(),
        };
        registry.insert(name.to_string(), entry.clone());
        write_json_atomic(&self.registry_path(), &registry)?;
        tracing::info!(overlay = name, %kind, "bound overlay name");
        Ok(entry)
    }

    /// All known overlays, sorted by kind then name
    pub fn list_overlays(&self) -> PlanResult<Vec<OverlaySummary>> {
        let mut out: Vec<OverlaySummary> = self
            .registry()?
            .into_iter()
            .map(|(name, entry)| OverlaySummary {
                name,
                kind: entry.kind,
                label: entry.label,
            })
            .collect();
        out.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        Ok(out)
    }

    /// Kind a name is bound to, if any
    pub fn kind_of(&self, name: &str) -> PlanResult<Option<OverlayKind>> {
        Ok(self.registry()?.get(name).map(|e| e.kind))
    }

    /// Overlay document for a plan, `None` when the plan has none under this name
    pub fn find(&self, plan_key: &str, name: &str) -> PlanResult<Option<Overlay>> {
        validate_segment("plan key", plan_key)?;
        validate_segment("overlay name", name)?;
        read_json(&self.overlay_path(name, plan_key))
    }

    /// Overlay document for a plan
    pub fn get(&self, plan_key: &str, name: &str) -> PlanResult<Overlay> {
        self.find(plan_key, name)?
            .ok_or_else(|| PlanError::not_found("overlay", format!("{name} for plan {plan_key}")))
    }

    /// Upsert a payload; the name must keep its established kind
    pub async fn put(
        &self,
        plan_key: &str,
        name: &str,
        label: Option<&str>,
        payload: OverlayPayload,
    ) -> PlanResult<Overlay> {
        validate_segment("plan key", plan_key)?;
        validate_segment("overlay name", name)?;
        let requested = payload.kind();
        let _guard = self.lock(plan_key, name).await?;
        let entry = self.bind(name, requested, label).await?;
        self.write(plan_key, name, entry.label, payload)
    }

    /// Read-modify-write one overlay under its lock.
    ///
    /// `f` receives the current payload (if any) and returns the new one; on
    /// error nothing is written. Fails with `OverlayKind` when the name is
    /// bound to another kind than `expected`.
    pub async fn update<F>(
        &self,
        plan_key: &str,
        name: &str,
        expected: OverlayKind,
        f: F,
    ) -> PlanResult<Overlay>
    where
        F: FnOnce(Option<OverlayPayload>) -> PlanResult<OverlayPayload>,
    {
        validate_segment("plan key", plan_key)?;
        validate_segment("overlay name", name)?;
        let _guard = self.lock(plan_key, name).await?;
        if let Some(actual) = self.kind_of(name)? {
            if actual != expected {
                return Err(PlanError::OverlayKind {
                    name: name.to_string(),
                    expected,
                    actual,
                });
            }
        }

        let current = self.find(plan_key, name)?.map(|o| o.payload);
        let next = f(current)?;
        if next.kind() != expected {
            return Err(PlanError::OverlayKind {
                name: name.to_string(),
                expected,
                actual: next.kind(),
            });
        }
        // the name may have been bound by a writer on another plan meanwhile
        let entry = self.bind(name, expected, None).await.map_err(|e| match e {
            PlanError::KindConflict { name, existing, .. } => PlanError::OverlayKind {
                name,
                expected,
                actual: existing,
            },
            other => other,
        })?;
        self.write(plan_key, name, entry.label, next)
    }

    fn write(&self, plan_key: &str, name: &str, label: String, payload: OverlayPayload) -> PlanResult<Overlay> {
        let overlay = Overlay {
            plan_key: plan_key.to_string(),
            name: name.to_string(),
            label,
            updated_at: Utc::now(),
            payload,
        };
        write_json_atomic(&self.overlay_path(name, plan_key), &overlay)?;
        tracing::debug!(plan_key, overlay = name, kind = %overlay.kind(), "overlay written");
        Ok(overlay)
    }
}
