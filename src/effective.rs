// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Effective-plan compilation
//!
//! Baseline + at most one overlay -> what to execute, what is excluded, what
//! is still pending and what must be created. File overlays are binding;
//! run overlays only produce a preview.

use std::collections::BTreeSet;

use crate::types::{
    Decision, EffectivePlan, EffectiveSummary, FileOverlay, GovernanceStatus, Overlay, OverlayKind, OverlayPayload,
    Plan, RunOverlay, Traceability,
};

/// Governance status of a plan under an optional overlay document
#[must_use]
pub fn governance_status(overlay: Option<&Overlay>) -> GovernanceStatus {
    match overlay.map(|o| &o.payload) {
        None => GovernanceStatus::NotAnalyzed,
        Some(OverlayPayload::File(file)) => GovernanceStatus::of_file(file),
        Some(OverlayPayload::Run(run)) => preview_status(run),
    }
}

fn preview_status(run: &RunOverlay) -> GovernanceStatus {
    if run.candidate_tests.is_empty() {
        GovernanceStatus::NotAnalyzed
    } else {
        GovernanceStatus::Review
    }
}

/// Execution set: baseline minus skips, then execute overrides
fn execution_set<'a>(
    plan: &'a Plan,
    execute: impl Iterator<Item = &'a str>,
    skipped: &BTreeSet<&str>,
) -> Vec<String> {
    let mut out: Vec<String> = plan
        .tests
        .iter()
        .filter(|t| !skipped.contains(t.as_str()))
        .cloned()
        .collect();
    for key in execute {
        if !skipped.contains(key) && !out.iter().any(|t| t == key) {
            out.push(key.to_string());
        }
    }
    out
}

fn baseline_view(plan: &Plan) -> EffectivePlan {
    let tests: Vec<String> = plan.tests.iter().cloned().collect();
    EffectivePlan {
        plan_key: plan.key.clone(),
        overlay: None,
        overlay_kind: None,
        binding: true,
        status: GovernanceStatus::NotAnalyzed,
        summary: EffectiveSummary {
            baseline_tests: tests.len(),
            effective_total: tests.len(),
            ..EffectiveSummary::default()
        },
        tests_to_execute: tests,
        tests_accepted: Vec::new(),
        tests_excluded: Vec::new(),
        tests_rejected: Vec::new(),
        tests_pending: Vec::new(),
        tests_missing: Vec::new(),
        traceability: Traceability::default(),
    }
}

/// Baseline view reported under an overlay name that has no document for this plan
#[must_use]
pub fn compile_unapplied(plan: &Plan, name: &str, kind: OverlayKind) -> EffectivePlan {
    let mut out = baseline_view(plan);
    out.overlay = Some(name.to_string());
    out.overlay_kind = Some(kind);
    out.binding = kind == OverlayKind::File;
    out
}

fn compile_file(plan: &Plan, file: &FileOverlay) -> EffectivePlan {
    let skipped: BTreeSet<&str> = file
        .existing_tests_to_skip
        .iter()
        .map(|e| e.test_key.as_str())
        .collect();
    let mut tests_to_execute = execution_set(
        plan,
        file.existing_tests_to_execute.iter().map(|e| e.test_key.as_str()),
        &skipped,
    );
    let tests_excluded: Vec<String> = file
        .existing_tests_to_skip
        .iter()
        .map(|e| e.test_key.clone())
        .collect();

    let mut tests_accepted = Vec::new();
    let mut tests_rejected = Vec::new();
    let mut tests_pending = Vec::new();
    for candidate in file.ai_candidates.values() {
        let key = candidate.key().to_string();
        match candidate.decision {
            Decision::Pending => tests_pending.push(key),
            Decision::Rejected => tests_rejected.push(key),
            Decision::Accepted => tests_accepted.push(key),
        }
    }
    for candidate in file.ai_candidates.values().filter(|c| c.decision == Decision::Accepted) {
        let covered = candidate
            .candidate
            .mapped_existing_test_key
            .as_ref()
            .is_some_and(|mapped| tests_to_execute.contains(mapped));
        if !covered {
            tests_to_execute.push(candidate.key().to_string());
        }
    }

    let mut prompt_hashes: Vec<String> = Vec::new();
    for run in &file.applied_runs {
        if !run.prompt_hash.is_empty() && !prompt_hashes.contains(&run.prompt_hash) {
            prompt_hashes.push(run.prompt_hash.clone());
        }
    }

    EffectivePlan {
        plan_key: plan.key.clone(),
        overlay: None,
        overlay_kind: Some(OverlayKind::File),
        binding: true,
        status: GovernanceStatus::of_file(file),
        summary: EffectiveSummary {
            baseline_tests: plan.tests.len(),
            accepted_ai: tests_accepted.len(),
            rejected_ai: tests_rejected.len(),
            pending_ai: tests_pending.len(),
            missing_tests: file.new_tests_to_create.len(),
            skipped_existing: tests_excluded.len(),
            effective_total: tests_to_execute.len(),
        },
        tests_to_execute,
        tests_accepted,
        tests_excluded,
        tests_rejected,
        tests_pending,
        tests_missing: file.new_tests_to_create.clone(),
        traceability: Traceability {
            runs: file.applied_runs.iter().map(|r| r.run_overlay.clone()).collect(),
            prompt_hashes,
            signals: file.signals.clone(),
        },
    }
}

fn compile_run(plan: &Plan, name: &str, run: &RunOverlay) -> EffectivePlan {
    let skipped: BTreeSet<&str> = run
        .existing_tests_to_skip
        .iter()
        .map(|e| e.test_key.as_str())
        .collect();
    let tests_to_execute = execution_set(
        plan,
        run.existing_tests_to_execute.iter().map(|e| e.test_key.as_str()),
        &skipped,
    );
    let tests_excluded: Vec<String> = run
        .existing_tests_to_skip
        .iter()
        .map(|e| e.test_key.clone())
        .collect();
    let tests_pending: Vec<String> = run
        .candidate_tests
        .iter()
        .map(|c| c.candidate_key.clone())
        .collect();

    EffectivePlan {
        plan_key: plan.key.clone(),
        overlay: None,
        overlay_kind: Some(OverlayKind::Run),
        binding: false,
        status: preview_status(run),
        summary: EffectiveSummary {
            baseline_tests: plan.tests.len(),
            pending_ai: tests_pending.len(),
            skipped_existing: tests_excluded.len(),
            effective_total: tests_to_execute.len(),
            ..EffectiveSummary::default()
        },
        tests_to_execute,
        tests_accepted: Vec::new(),
        tests_excluded,
        tests_rejected: Vec::new(),
        tests_pending,
        tests_missing: Vec::new(),
        traceability: Traceability {
            runs: vec![name.to_string()],
            prompt_hashes: if run.provenance.prompt_hash.is_empty() {
                Vec::new()
            } else {
                vec![run.provenance.prompt_hash.clone()]
            },
            signals: Vec::new(),
        },
    }
}

/// Compile the effective plan of `plan` under `overlay` (baseline when `None`)
#[must_use]
pub fn compile(plan: &Plan, overlay: Option<&Overlay>) -> EffectivePlan {
    let Some(overlay) = overlay else {
        return baseline_view(plan);
    };
    let mut out = match &overlay.payload {
        OverlayPayload::File(file) => compile_file(plan, file),
        OverlayPayload::Run(run) => compile_run(plan, &overlay.name, run),
    };
    out.overlay = Some(overlay.name.clone());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::merge_run;
    use crate::ledger::decide;
    use crate::reconcile::reconcile;
    use crate::types::{CandidateTest, Priority, Provenance, TestType};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn plan() -> Plan {
        Plan {
            key: "PLAN-1".into(),
            summary: String::new(),
            jira_keys: vec!["US-1".into()],
            tests: ["T1", "T2"].into_iter().map(String::from).collect(),
            test_titles: BTreeMap::new(),
        }
    }

    fn candidate(key: &str, mapped: Option<&str>) -> CandidateTest {
        CandidateTest {
            candidate_key: key.into(),
            title: format!("candidate {key}"),
            priority: Priority::Medium,
            test_type: TestType::Functional,
            given: String::new(),
            when: String::new(),
            then: String::new(),
            mapped_existing_test_key: mapped.map(str::to_string),
        }
    }

    fn run_overlay() -> RunOverlay {
        reconcile(&plan(), vec![candidate("C1", Some("T1")), candidate("C2", None)]).into_run(
            "US-1",
            Utc::now(),
            Provenance {
                prompt_hash: "sha256:abc".into(),
                ..Provenance::default()
            },
        )
    }

    fn overlay(name: &str, payload: OverlayPayload) -> Overlay {
        Overlay {
            plan_key: "PLAN-1".into(),
            name: name.into(),
            label: name.into(),
            updated_at: Utc::now(),
            payload,
        }
    }

    #[test]
    fn test_baseline_only() {
        let out = compile(&plan(), None);
        assert_eq!(out.tests_to_execute, vec!["T1", "T2"]);
        assert_eq!(out.status, GovernanceStatus::NotAnalyzed);
        assert!(out.binding);
        assert!(out.tests_excluded.is_empty() && out.tests_pending.is_empty());
    }

    #[test]
    fn test_governance_scenario() {
        let mut file = FileOverlay::default();
        merge_run(&mut file, "R1", &run_overlay());
        decide(&mut file, "C2", Decision::Accepted, None).unwrap();

        let out = compile(&plan(), Some(&overlay("F1", OverlayPayload::File(file))));
        assert_eq!(out.tests_to_execute, vec!["T2", "C2"]);
        assert_eq!(out.tests_accepted, vec!["C2"]);
        assert_eq!(out.tests_excluded, vec!["T1"]);
        assert_eq!(out.tests_pending, vec!["C1"]);
        assert_eq!(out.status, GovernanceStatus::Review);
        assert_eq!(out.summary.effective_total, 2);
        assert_eq!(out.traceability.runs, vec!["R1"]);
        assert_eq!(out.traceability.prompt_hashes, vec!["sha256:abc"]);
    }

    #[test]
    fn test_accepted_mapped_to_executed_test_is_not_added() {
        let mut file = FileOverlay::default();
        let mut c = crate::types::AiCandidate::pending(candidate("C1", Some("T2")), None);
        c.decision = Decision::Accepted;
        file.ai_candidates.insert("C1".into(), c);
        let out = compile(&plan(), Some(&overlay("F1", OverlayPayload::File(file))));
        assert_eq!(out.tests_to_execute, vec!["T1", "T2"]);
        assert_eq!(out.tests_accepted, vec!["C1"]);
        assert_eq!(out.status, GovernanceStatus::Auto);
    }

    #[test]
    fn test_rejected_is_not_executed_or_skipped() {
        let mut file = FileOverlay::default();
        merge_run(&mut file, "R1", &run_overlay());
        decide(&mut file, "C1", Decision::Rejected, None).unwrap();
        decide(&mut file, "C2", Decision::Rejected, None).unwrap();
        let out = compile(&plan(), Some(&overlay("F1", OverlayPayload::File(file))));
        assert_eq!(out.tests_rejected, vec!["C1", "C2"]);
        assert_eq!(out.tests_excluded, vec!["T1"]);
        assert_eq!(out.tests_to_execute, vec!["T2"]);
        assert_eq!(out.status, GovernanceStatus::Auto);
    }

    #[test]
    fn test_run_preview_is_not_binding() {
        let out = compile(&plan(), Some(&overlay("run-US-1", OverlayPayload::Run(run_overlay()))));
        assert!(!out.binding);
        assert_eq!(out.overlay_kind, Some(OverlayKind::Run));
        assert_eq!(out.tests_pending, vec!["C1", "C2"]);
        assert_eq!(out.tests_to_execute, vec!["T2"]);
        assert_eq!(out.status, GovernanceStatus::Review);
    }

    #[test]
    fn test_unapplied_overlay_name() {
        let out = compile_unapplied(&plan(), "F1", OverlayKind::File);
        assert_eq!(out.overlay.as_deref(), Some("F1"));
        assert_eq!(out.status, GovernanceStatus::NotAnalyzed);
        assert_eq!(out.tests_to_execute.len(), 2);
    }
}
