// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! qaplan library - overlay-governed QA test plans
//!
//! A baseline test plan is resolved from upstream Jira/Xray data and never
//! mutated. AI suggestions and human review live in named overlays stacked
//! on top of it; the effective plan is compiled from baseline + one overlay.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod apply;
pub mod commands;
pub mod config;
pub mod effective;
pub mod enrich;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod reconcile;
pub mod resolver;
pub mod server;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod upstream;

/// Core data types: plans, overlays, candidates, decisions
pub mod types {
    use chrono::{DateTime, Utc};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeMap, BTreeSet};
    use std::fmt;
    use std::str::FromStr;

    use crate::error::PlanError;

    // =========================================================================
    // Baseline Plan
    // =========================================================================

    /// Baseline test plan, derived from upstream data on every read
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Plan {
        /// Plan key (Jira epic/story key acting as test-plan key)
        pub key: String,
        /// Plan summary
        #[serde(default)]
        pub summary: String,
        /// Linked Jira issue keys, in upstream order
        #[serde(default)]
        pub jira_keys: Vec<String>,
        /// Existing test identifiers (the baseline)
        #[serde(default)]
        pub tests: BTreeSet<String>,
        /// Known Xray summaries for baseline tests, used for title matching
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        pub test_titles: BTreeMap<String, String>,
    }

    // =========================================================================
    // Candidates and Decisions
    // =========================================================================

    /// Test priority
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Priority {
        /// Must run
        High,
        /// Should run
        #[default]
        Medium,
        /// Nice to have
        Low,
    }

    /// Test type suggested by the generator
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum TestType {
        /// Functional behaviour
        #[default]
        Functional,
        /// Regression guard
        Regression,
        /// Security check
        Security,
        /// Performance check
        Performance,
    }

    /// AI-suggested test extracted from one generation run
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CandidateTest {
        /// Unique key within the run
        pub candidate_key: String,
        /// Test title
        pub title: String,
        /// Priority
        #[serde(default)]
        pub priority: Priority,
        /// Test type
        #[serde(rename = "type", default)]
        pub test_type: TestType,
        /// Gherkin "given"
        #[serde(default)]
        pub given: String,
        /// Gherkin "when"
        #[serde(default)]
        pub when: String,
        /// Gherkin "then"
        #[serde(default)]
        pub then: String,
        /// Existing baseline test this candidate supersedes or covers
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub mapped_existing_test_key: Option<String>,
    }

    /// Human verdict on a candidate
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Decision {
        /// Not reviewed yet
        #[default]
        Pending,
        /// Candidate joins the plan
        Accepted,
        /// Candidate discarded
        Rejected,
    }

    impl Decision {
        /// Wire name
        #[must_use]
        pub fn as_str(&self) -> &'static str {
            match self {
                Self::Pending => "PENDING",
                Self::Accepted => "ACCEPTED",
                Self::Rejected => "REJECTED",
            }
        }
    }

    impl fmt::Display for Decision {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    impl FromStr for Decision {
        type Err = PlanError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_uppercase().as_str() {
                "PENDING" => Ok(Self::Pending),
                "ACCEPTED" => Ok(Self::Accepted),
                "REJECTED" => Ok(Self::Rejected),
                _ => Err(PlanError::InvalidDecision(s.to_string())),
            }
        }
    }

    /// Candidate copied into a file overlay, carrying its decision
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AiCandidate {
        /// The candidate as exported by the run
        #[serde(flatten)]
        pub candidate: CandidateTest,
        /// Current decision
        #[serde(default)]
        pub decision: Decision,
        /// Reviewer rationale
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub rationale: Option<String>,
        /// Run overlay the candidate came from
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub source_run: Option<String>,
        /// When the decision was last recorded
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub decided_at: Option<DateTime<Utc>>,
    }

    impl AiCandidate {
        /// Wrap a run candidate as a pending file-overlay candidate
        #[must_use]
        pub fn pending(candidate: CandidateTest, source_run: Option<String>) -> Self {
            Self {
                candidate,
                decision: Decision::Pending,
                rationale: None,
                source_run,
                decided_at: None,
            }
        }

        /// Candidate key
        #[must_use]
        pub fn key(&self) -> &str {
            &self.candidate.candidate_key
        }
    }

    // =========================================================================
    // Existing-test governance
    // =========================================================================

    /// Who produced an existing-test entry
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Origin {
        /// Reconciler or enrich rules
        #[default]
        Computed,
        /// Recorded by a reviewer; never overwritten by recomputation
        Human,
    }

    /// Where an existing test ends up
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Disposition {
        /// Keep executing
        Execute,
        /// Skip
        Skip,
    }

    impl FromStr for Disposition {
        type Err = PlanError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "execute" | "run" => Ok(Self::Execute),
                "skip" => Ok(Self::Skip),
                _ => Err(PlanError::InvalidInput(format!(
                    "unknown disposition '{s}', expected EXECUTE or SKIP"
                ))),
            }
        }
    }

    /// Execute/skip entry for an existing test
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ExistingTestEntry {
        /// Existing test key
        pub test_key: String,
        /// Why the test is executed or skipped
        #[serde(default)]
        pub reason: String,
        /// Supporting evidence
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub evidence: Option<String>,
        /// Producer of the entry
        #[serde(default)]
        pub origin: Origin,
    }

    impl ExistingTestEntry {
        /// Computed entry
        #[must_use]
        pub fn computed(test_key: impl Into<String>, reason: impl Into<String>) -> Self {
            Self {
                test_key: test_key.into(),
                reason: reason.into(),
                evidence: None,
                origin: Origin::Computed,
            }
        }

        /// Attach evidence
        #[must_use]
        pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
            self.evidence = Some(evidence.into());
            self
        }
    }

    /// Governance-approved test that does not exist in Xray yet
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct NewTest {
        /// Jira issue the test covers
        pub jira_key: String,
        /// Title
        pub title: String,
        /// Priority
        #[serde(default)]
        pub priority: Priority,
        /// Tags
        #[serde(default)]
        pub tags: Vec<String>,
        /// Gherkin "given"
        #[serde(default)]
        pub given: String,
        /// Gherkin "when"
        #[serde(default)]
        pub when: String,
        /// Gherkin "then"
        #[serde(default)]
        pub then: String,
    }

    // =========================================================================
    // Overlays
    // =========================================================================

    /// Overlay kind; a name is bound to one kind forever
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum OverlayKind {
        /// Computed from a generation run, read-only
        Run,
        /// Durable, decision-bearing
        File,
    }

    impl fmt::Display for OverlayKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Self::Run => "run",
                Self::File => "file",
            })
        }
    }

    /// Provenance of a generation run
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Provenance {
        /// Logical prompt identifier
        #[serde(default)]
        pub prompt_id: String,
        /// `sha256:<hex>` of system + user prompt
        #[serde(default)]
        pub prompt_hash: String,
        /// Logical schema identifier of the suggestions
        #[serde(default)]
        pub schema_id: String,
        /// `sha256:<hex>` of the schema descriptor
        #[serde(default)]
        pub schema_hash: String,
        /// LLM provider label
        #[serde(default)]
        pub provider: String,
        /// Model label
        #[serde(default)]
        pub model: String,
    }

    /// Payload of a run overlay: reconciled candidates of one run
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RunOverlay {
        /// Jira key the run was generated for
        pub jira_key: String,
        /// Run generation time
        pub generated_at: DateTime<Utc>,
        /// Prompt/schema provenance
        #[serde(default)]
        pub provenance: Provenance,
        /// All candidates of the run, mapped or not
        #[serde(default)]
        pub candidate_tests: Vec<CandidateTest>,
        /// Baseline tests left untouched by the run
        #[serde(default)]
        pub existing_tests_to_execute: Vec<ExistingTestEntry>,
        /// Baseline tests superseded or covered by a candidate
        #[serde(default)]
        pub existing_tests_to_skip: Vec<ExistingTestEntry>,
    }

    /// Record of a run applied into a file overlay
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AppliedRun {
        /// Run overlay name
        pub run_overlay: String,
        /// Jira key of the run
        pub jira_key: String,
        /// Prompt hash of the run
        #[serde(default)]
        pub prompt_hash: String,
        /// When it was (last) applied
        pub applied_at: DateTime<Utc>,
    }

    /// Payload of a file overlay: the durable governance record
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FileOverlay {
        /// AI candidates keyed by `candidate_key`, stored as a list
        #[serde(default, with = "keyed_candidates")]
        pub ai_candidates: IndexMap<String, AiCandidate>,
        /// Existing tests kept in the execution set
        #[serde(default)]
        pub existing_tests_to_execute: Vec<ExistingTestEntry>,
        /// Existing tests removed from the execution set
        #[serde(default)]
        pub existing_tests_to_skip: Vec<ExistingTestEntry>,
        /// Tests to create in Xray
        #[serde(default)]
        pub new_tests_to_create: Vec<NewTest>,
        /// Runs applied into this overlay
        #[serde(default)]
        pub applied_runs: Vec<AppliedRun>,
        /// Signals raised by the enrich rules
        #[serde(default)]
        pub signals: Vec<String>,
    }

    impl FileOverlay {
        /// Find the existing-test entry for a key, with its disposition
        #[must_use]
        pub fn existing_entry(&self, test_key: &str) -> Option<(Disposition, &ExistingTestEntry)> {
            self.existing_tests_to_execute
                .iter()
                .find(|e| e.test_key == test_key)
                .map(|e| (Disposition::Execute, e))
                .or_else(|| {
                    self.existing_tests_to_skip
                        .iter()
                        .find(|e| e.test_key == test_key)
                        .map(|e| (Disposition::Skip, e))
                })
        }

        /// Place an entry in exactly one of execute/skip.
        ///
        /// Computed entries never replace a human entry for the same key.
        /// Returns whether the overlay changed.
        pub fn set_existing(&mut self, disposition: Disposition, entry: ExistingTestEntry) -> bool {
            if let Some((current, existing)) = self.existing_entry(&entry.test_key) {
                if existing.origin == Origin::Human && entry.origin == Origin::Computed {
                    return false;
                }
                if current == disposition && *existing == entry {
                    return false;
                }
            }
            self.existing_tests_to_execute.retain(|e| e.test_key != entry.test_key);
            self.existing_tests_to_skip.retain(|e| e.test_key != entry.test_key);
            match disposition {
                Disposition::Execute => self.existing_tests_to_execute.push(entry),
                Disposition::Skip => self.existing_tests_to_skip.push(entry),
            }
            true
        }

        /// Number of candidates still pending
        #[must_use]
        pub fn pending_count(&self) -> usize {
            self.ai_candidates
                .values()
                .filter(|c| c.decision == Decision::Pending)
                .count()
        }
    }

    /// Overlay payload, tagged by kind
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "lowercase")]
    pub enum OverlayPayload {
        /// Run-derived, read-only
        Run(RunOverlay),
        /// File-derived, decision-bearing
        File(FileOverlay),
    }

    impl OverlayPayload {
        /// Kind of this payload
        #[must_use]
        pub fn kind(&self) -> OverlayKind {
            match self {
                Self::Run(_) => OverlayKind::Run,
                Self::File(_) => OverlayKind::File,
            }
        }
    }

    /// A named overlay stored for one plan
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Overlay {
        /// Plan key
        pub plan_key: String,
        /// Overlay name
        pub name: String,
        /// Display label
        pub label: String,
        /// Last write
        pub updated_at: DateTime<Utc>,
        /// Kind-specific payload
        pub payload: OverlayPayload,
    }

    impl Overlay {
        /// Kind of this overlay
        #[must_use]
        pub fn kind(&self) -> OverlayKind {
            self.payload.kind()
        }
    }

    /// Entry of the overlay listing
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OverlaySummary {
        /// Overlay name
        pub name: String,
        /// Kind the name is bound to
        pub kind: OverlayKind,
        /// Display label
        pub label: String,
    }

    // =========================================================================
    // Governance and Effective Plan
    // =========================================================================

    /// Derived review status of a plan + overlay
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum GovernanceStatus {
        /// No overlay applied
        NotAnalyzed,
        /// At least one candidate is pending
        Review,
        /// Every candidate decided
        Auto,
    }

    impl GovernanceStatus {
        /// Status of a file overlay
        #[must_use]
        pub fn of_file(overlay: &FileOverlay) -> Self {
            if overlay.pending_count() > 0 {
                Self::Review
            } else {
                Self::Auto
            }
        }
    }

    impl fmt::Display for GovernanceStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Self::NotAnalyzed => "NOT_ANALYZED",
                Self::Review => "REVIEW",
                Self::Auto => "AUTO",
            })
        }
    }

    /// Counters of an effective plan
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EffectiveSummary {
        /// Baseline test count
        pub baseline_tests: usize,
        /// Accepted candidates
        pub accepted_ai: usize,
        /// Rejected candidates
        pub rejected_ai: usize,
        /// Pending candidates
        pub pending_ai: usize,
        /// Tests to create
        pub missing_tests: usize,
        /// Existing tests skipped
        pub skipped_existing: usize,
        /// Size of the execution set
        pub effective_total: usize,
    }

    /// Where the overlay content came from
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Traceability {
        /// Runs feeding the overlay
        #[serde(default)]
        pub runs: Vec<String>,
        /// Prompt hashes of those runs
        #[serde(default)]
        pub prompt_hashes: Vec<String>,
        /// Enrich signals
        #[serde(default)]
        pub signals: Vec<String>,
    }

    /// Final execute/skip/create view of a plan
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EffectivePlan {
        /// Plan key
        pub plan_key: String,
        /// Overlay used, if any
        pub overlay: Option<String>,
        /// Kind of that overlay
        pub overlay_kind: Option<OverlayKind>,
        /// False for run-overlay previews
        pub binding: bool,
        /// Governance status
        pub status: GovernanceStatus,
        /// Existing tests to execute followed by accepted candidates
        pub tests_to_execute: Vec<String>,
        /// Accepted candidates surfaced as additional executable tests
        pub tests_accepted: Vec<String>,
        /// Existing tests skipped
        pub tests_excluded: Vec<String>,
        /// Rejected candidates (never part of the plan)
        pub tests_rejected: Vec<String>,
        /// Candidates awaiting a decision
        pub tests_pending: Vec<String>,
        /// Tests to create in Xray
        pub tests_missing: Vec<NewTest>,
        /// Counters
        pub summary: EffectiveSummary,
        /// Provenance
        pub traceability: Traceability,
    }

    /// Serialize `candidate_key -> candidate` maps as a plain list
    mod keyed_candidates {
        use super::AiCandidate;
        use indexmap::IndexMap;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            map: &IndexMap<String, AiCandidate>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(map.values())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<IndexMap<String, AiCandidate>, D::Error> {
            let list = Vec::<AiCandidate>::deserialize(deserializer)?;
            let mut map = IndexMap::with_capacity(list.len());
            for candidate in list {
                // first occurrence wins
                map.entry(candidate.key().to_string()).or_insert(candidate);
            }
            Ok(map)
        }
    }
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::error::{PlanError, PlanResult};
    pub use crate::types::*;
    pub use anyhow::{Context, Result};
}
