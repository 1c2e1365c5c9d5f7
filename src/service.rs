// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Request-scoped orchestration shared by the HTTP server and the CLI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::Config;
use crate::effective;
use crate::enrich;
use crate::error::{PlanError, PlanResult};
use crate::llm::{self, Generator, TestPlanResponse};
use crate::reconcile;
use crate::resolver::Resolver;
use crate::store::{sha256_text, validate_segment, OverlayStore, RunDocument, RunSummary};
use crate::types::{
    Decision, Disposition, EffectivePlan, FileOverlay, GovernanceStatus, Overlay, OverlayKind, OverlayPayload,
    OverlaySummary, Plan, Provenance,
};
use crate::upstream::{guarded, key_aliases, FileUpstream, Upstream};

/// Catalog entry with the governance status under the selected overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanListing {
    /// Plan key
    pub key: String,
    /// Summary
    pub summary: String,
    /// Linked Jira keys
    pub jira_keys: Vec<String>,
    /// Baseline size
    pub tests_count: usize,
    /// Status under the selected overlay
    pub overlay_status: GovernanceStatus,
}

/// Baseline plan with the selected overlay document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanView {
    /// Baseline
    #[serde(flatten)]
    pub plan: Plan,
    /// Overlay document for this plan, if any
    pub overlay: Option<Overlay>,
    /// Kind the selected overlay name is bound to
    pub overlay_kind: Option<OverlayKind>,
    /// Governance status
    pub status: GovernanceStatus,
}

/// Body of a run export
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportRunRequest {
    /// Rendered markdown
    pub markdown: String,
    /// Raw suggestion objects
    pub suggestions: Vec<Value>,
    /// Context seen by the generator
    pub raw_context: Option<Value>,
    /// Logical schema id
    pub schema_id: Option<String>,
    /// Schema hash computed by the producer
    pub schema_hash: Option<String>,
    /// Provider label
    pub provider: Option<String>,
    /// Model label
    pub model: Option<String>,
}

impl ExportRunRequest {
    /// Export body for a generation result
    #[must_use]
    pub fn from_response(response: &TestPlanResponse) -> Self {
        Self {
            markdown: response.markdown.clone(),
            suggestions: response
                .suggestions
                .iter()
                .filter_map(|s| serde_json::to_value(s).ok())
                .collect(),
            raw_context: Some(response.raw_context.clone()),
            schema_id: None,
            schema_hash: None,
            provider: Some(response.provider.clone()),
            model: Some(response.model.clone()),
        }
    }
}

/// Result of a run export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOutcome {
    /// Jira key
    pub jira_key: String,
    /// Generation time of the stored run
    pub generated_at: DateTime<Utc>,
    /// Archived prompt hash
    pub prompt_hash: String,
    /// Schema hash
    pub schema_hash: String,
    /// Whether an earlier run was replaced
    pub overwrote: bool,
    /// Generation time of the replaced run
    pub previous_generated_at: Option<DateTime<Utc>>,
    /// Candidates extracted from the suggestions
    pub candidates: usize,
    /// Run overlay name
    pub run_overlay: String,
    /// Plans whose run overlay was refreshed
    pub refreshed_plans: Vec<String>,
}

/// Name of the run overlay fed by exports for a Jira key
#[must_use]
pub fn run_overlay_name(jira_key: &str) -> String {
    format!("run-{jira_key}")
}

/// Hash of the schema id and the sorted union of suggestion keys
#[must_use]
pub fn schema_hash(schema_id: &str, suggestions: &[Value]) -> String {
    let keys: BTreeSet<&str> = suggestions
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|o| o.keys().map(String::as_str))
        .collect();
    let canonical = serde_json::json!({ "schema_id": schema_id, "suggestion_keys": keys });
    sha256_text(&canonical.to_string())
}

/// Plan and overlay operations over one configuration
pub struct PlanService {
    config: Config,
    resolver: Resolver,
    store: OverlayStore,
    generator: Arc<dyn Generator>,
}

impl PlanService {
    /// Service over explicit collaborators
    pub fn new(config: Config, upstream: Arc<dyn Upstream>, generator: Arc<dyn Generator>) -> Self {
        let resolver = Resolver::new(upstream, config.upstream_timeout());
        let store = OverlayStore::new(config.data_dir.clone(), config.lock_wait());
        Self {
            config,
            resolver,
            store,
            generator,
        }
    }

    /// Service over snapshot files and the configured LLM provider
    pub fn from_config(config: Config) -> PlanResult<Self> {
        let upstream: Arc<dyn Upstream> = Arc::new(FileUpstream::new(config.upstream_dir()));
        let generator = llm::from_config(&config.llm)?;
        Ok(Self::new(config, upstream, generator))
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Overlay store
    #[must_use]
    pub fn store(&self) -> &OverlayStore {
        &self.store
    }

    fn upstream(&self) -> &Arc<dyn Upstream> {
        self.resolver.upstream()
    }

    /// Known Jira issue keys
    pub async fn issue_keys(&self) -> PlanResult<Vec<String>> {
        guarded("jira", self.resolver.budget(), self.upstream().issue_keys()).await
    }

    /// Kind an overlay name is bound to; unknown names are `NotFound`
    fn overlay_kind(&self, name: &str) -> PlanResult<OverlayKind> {
        validate_segment("overlay name", name)?;
        self.store
            .kind_of(name)?
            .ok_or_else(|| PlanError::not_found("overlay", name))
    }

    /// Catalog with governance status under `overlay`
    pub async fn list_plans(&self, overlay: Option<&str>) -> PlanResult<Vec<PlanListing>> {
        if let Some(name) = overlay {
            self.overlay_kind(name)?;
        }
        let plans = self.resolver.list().await?;
        let mut out = Vec::with_capacity(plans.len());
        for plan in plans {
            let document = match overlay {
                Some(name) => self.store.find(&plan.key, name)?,
                None => None,
            };
            out.push(PlanListing {
                overlay_status: effective::governance_status(document.as_ref()),
                tests_count: plan.tests.len(),
                key: plan.key,
                summary: plan.summary,
                jira_keys: plan.jira_keys,
            });
        }
        Ok(out)
    }

    /// Baseline plan, with the overlay document when one is selected
    pub async fn plan(&self, plan_key: &str, overlay: Option<&str>) -> PlanResult<PlanView> {
        let kind = overlay.map(|name| self.overlay_kind(name)).transpose()?;
        let plan = self.resolver.resolve(plan_key).await?;
        let document = match overlay {
            Some(name) => self.store.find(&plan.key, name)?,
            None => None,
        };
        Ok(PlanView {
            status: effective::governance_status(document.as_ref()),
            plan,
            overlay: document,
            overlay_kind: kind,
        })
    }

    /// All overlays
    pub fn overlays(&self) -> PlanResult<Vec<OverlaySummary>> {
        self.store.list_overlays()
    }

    /// Recompute baseline governance into a file overlay
    pub async fn enrich(&self, plan_key: &str, overlay: &str) -> PlanResult<FileOverlay> {
        validate_segment("overlay name", overlay)?;
        if let Some(actual) = self.store.kind_of(overlay)? {
            if actual != OverlayKind::File {
                return Err(PlanError::OverlayKind {
                    name: overlay.to_string(),
                    expected: OverlayKind::File,
                    actual,
                });
            }
        }
        let plan = self.resolver.resolve(plan_key).await?;
        let enrichment = enrich::compute(&self.resolver, &plan).await?;

        let mut changed = 0;
        let written = self
            .store
            .update(&plan.key, overlay, OverlayKind::File, |current| {
                let mut file = match current {
                    Some(OverlayPayload::File(file)) => file,
                    Some(OverlayPayload::Run(_)) => {
                        return Err(PlanError::OverlayKind {
                            name: overlay.to_string(),
                            expected: OverlayKind::File,
                            actual: OverlayKind::Run,
                        })
                    }
                    None => FileOverlay::default(),
                };
                changed = enrich::merge_into(&mut file, enrichment);
                Ok(OverlayPayload::File(file))
            })
            .await?;
        tracing::info!(plan_key = %plan.key, overlay, changed, "plan enriched");
        match written.payload {
            OverlayPayload::File(file) => Ok(file),
            OverlayPayload::Run(_) => Err(PlanError::Storage(format!("overlay '{overlay}' has the wrong kind"))),
        }
    }

    /// Apply a run overlay into a file overlay
    pub async fn apply_run(&self, plan_key: &str, run: &str, overlay: &str) -> PlanResult<FileOverlay> {
        crate::apply::apply_run(&self.store, plan_key.trim(), run, overlay).await
    }

    /// Record a candidate decision given as text
    pub async fn set_decision(
        &self,
        plan_key: &str,
        overlay: &str,
        candidate_key: &str,
        decision: &str,
        rationale: Option<String>,
    ) -> PlanResult<FileOverlay> {
        let decision: Decision = decision.parse()?;
        crate::ledger::set_decision(&self.store, plan_key.trim(), overlay, candidate_key, decision, rationale).await
    }

    /// Record a reviewer override for a baseline test
    pub async fn set_existing(
        &self,
        plan_key: &str,
        overlay: &str,
        test_key: &str,
        disposition: &str,
        reason: Option<String>,
    ) -> PlanResult<FileOverlay> {
        let disposition: Disposition = disposition.parse()?;
        let plan = self.resolver.resolve(plan_key).await?;
        let test_key = test_key.trim();
        if !plan.tests.contains(test_key) {
            return Err(PlanError::not_found("baseline test", format!("{test_key} in plan {}", plan.key)));
        }
        crate::ledger::set_existing_override(&self.store, &plan.key, overlay, test_key, disposition, reason).await
    }

    /// Effective plan under an optional overlay
    pub async fn effective(&self, plan_key: &str, overlay: Option<&str>) -> PlanResult<EffectivePlan> {
        let kind = overlay.map(|name| self.overlay_kind(name)).transpose()?;
        let plan = self.resolver.resolve(plan_key).await?;
        let (Some(name), Some(kind)) = (overlay, kind) else {
            return Ok(effective::compile(&plan, None));
        };
        Ok(match self.store.find(&plan.key, name)? {
            Some(document) => effective::compile(&plan, Some(&document)),
            None => effective::compile_unapplied(&plan, name, kind),
        })
    }

    /// Generate a test plan for a Jira issue
    pub async fn generate(&self, jira_key: &str) -> PlanResult<TestPlanResponse> {
        let jira_key = jira_key.trim();
        let budget = self.resolver.budget();
        let issue = guarded("jira", budget, self.upstream().issue(jira_key)).await?;
        let tests = guarded("xray", budget, self.upstream().xray_tests(jira_key)).await?;
        let changes = guarded("bitbucket", budget, self.upstream().code_changes(jira_key)).await?;
        guarded(
            "llm",
            self.config.llm.timeout(),
            llm::generate_test_plan(self.generator.as_ref(), &issue, &tests, &changes),
        )
        .await
    }

    /// Stored runs
    pub fn runs(&self) -> PlanResult<Vec<RunSummary>> {
        self.store.list_runs()
    }

    /// Persist a generation run and refresh the run overlay of every linked plan
    pub async fn export_run(&self, jira_key: &str, request: ExportRunRequest) -> PlanResult<ExportOutcome> {
        let jira_key = jira_key.trim();
        validate_segment("jira key", jira_key)?;
        let run_overlay = run_overlay_name(jira_key);
        if let Some(existing) = self.store.kind_of(&run_overlay)?.filter(|k| *k != OverlayKind::Run) {
            return Err(PlanError::KindConflict {
                name: run_overlay,
                existing,
                requested: OverlayKind::Run,
            });
        }
        let budget = self.resolver.budget();

        let issue = guarded("jira", budget, self.upstream().issue(jira_key)).await?;
        let tests = guarded("xray", budget, self.upstream().xray_tests(jira_key)).await?;
        let changes = guarded("bitbucket", budget, self.upstream().code_changes(jira_key)).await?;
        let user_prompt = llm::build_prompt(&issue, &tests, &changes);
        let prompt_hash = self
            .store
            .archive_prompt(llm::PROMPT_ID, &llm::combined_prompt(llm::SYSTEM_PROMPT, &user_prompt))
            .await?;

        let schema_id = request
            .schema_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| llm::SCHEMA_ID.to_string());
        let schema_hash = request
            .schema_hash
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| schema_hash(&schema_id, &request.suggestions));

        let document = RunDocument {
            jira_key: jira_key.to_string(),
            generated_at: Utc::now(),
            provenance: Provenance {
                prompt_id: llm::PROMPT_ID.to_string(),
                prompt_hash: prompt_hash.clone(),
                schema_id,
                schema_hash: schema_hash.clone(),
                provider: request.provider.unwrap_or_else(|| "mock".to_string()),
                model: request.model.unwrap_or_default(),
            },
            markdown: request.markdown,
            suggestions: request.suggestions,
            raw_context: request.raw_context,
        };
        let previous = self.store.save_run(&document).await?;

        let suggestions = reconcile::suggestions_from_values(&document.suggestions);
        let candidates = reconcile::candidates_from_suggestions(jira_key, &suggestions);
        let aliases = key_aliases(jira_key);

        let mut refreshed_plans = Vec::new();
        for listed in self.resolver.list().await? {
            if !listed.jira_keys.iter().any(|k| aliases.contains(k)) {
                continue;
            }
            let plan = self.resolver.resolve(&listed.key).await?;
            let payload = reconcile::reconcile(&plan, candidates.clone()).into_run(
                jira_key,
                document.generated_at,
                document.provenance.clone(),
            );
            self.store
                .put(&plan.key, &run_overlay, Some(&format!("Run {jira_key}")), OverlayPayload::Run(payload))
                .await?;
            refreshed_plans.push(plan.key);
        }

        tracing::info!(
            jira_key,
            prompt_hash = %prompt_hash,
            candidates = candidates.len(),
            plans = refreshed_plans.len(),
            overwrote = previous.is_some(),
            "run exported"
        );
        Ok(ExportOutcome {
            jira_key: jira_key.to_string(),
            generated_at: document.generated_at,
            prompt_hash,
            schema_hash,
            overwrote: previous.is_some(),
            previous_generated_at: previous.map(|p| p.generated_at),
            candidates: candidates.len(),
            run_overlay,
            refreshed_plans,
        })
    }

    /// Secret-free configuration and store diagnostics
    pub fn diagnostics(&self) -> PlanResult<Value> {
        let mut diag = self.config.diagnostics();
        if let Value::Object(map) = &mut diag {
            map.insert("overlays".into(), Value::from(self.store.list_overlays()?.len()));
            map.insert("runs".into(), Value::from(self.store.list_runs()?.len()));
            map.insert("llm_generator".into(), Value::from(self.generator.provider()));
        }
        Ok(diag)
    }
}
