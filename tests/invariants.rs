// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Governance invariant tests
//!
//! These tests verify that the overlay model holds its guarantees:
//! 1. Baseline plans are never mutated by overlays
//! 2. Re-applying the same run is idempotent and keeps decisions
//! 3. A decision touches exactly one candidate
//! 4. REVIEW iff at least one candidate is pending
//! 5. Every baseline test is either executed or excluded, never both
//! 6. An overlay name is bound to one kind forever
//! 7. Unknown candidates fail without writing anything, and neither does an
//!    export into a name bound to the other kind

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use qaplan::apply::merge_run;
use qaplan::effective::compile;
use qaplan::error::PlanError;
use qaplan::ledger::decide;
use qaplan::reconcile::reconcile;
use qaplan::service::ExportRunRequest;
use qaplan::store::OverlayStore;
use qaplan::types::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

fn make_plan(tests: usize) -> Plan {
    Plan {
        key: "PLAN-1".to_string(),
        summary: "Checkout plan".to_string(),
        jira_keys: vec!["US-1".to_string()],
        tests: (0..tests).map(|i| format!("T{i}")).collect(),
        test_titles: BTreeMap::new(),
    }
}

fn make_candidate(key: &str, mapped: Option<String>) -> CandidateTest {
    CandidateTest {
        candidate_key: key.to_string(),
        title: format!("Generated check {key}"),
        priority: Priority::Medium,
        test_type: TestType::Functional,
        given: String::new(),
        when: String::new(),
        then: String::new(),
        mapped_existing_test_key: mapped,
    }
}

fn make_run(plan: &Plan, mappings: &[Option<usize>]) -> RunOverlay {
    let candidates = mappings
        .iter()
        .enumerate()
        .map(|(i, m)| make_candidate(&format!("C{i}"), m.map(|t| format!("T{t}"))))
        .collect();
    reconcile(plan, candidates).into_run("US-1", Utc::now(), Provenance::default())
}

fn make_overlay(plan: &Plan, name: &str, payload: OverlayPayload) -> Overlay {
    Overlay {
        plan_key: plan.key.clone(),
        name: name.to_string(),
        label: name.to_string(),
        updated_at: Utc::now(),
        payload,
    }
}

fn decision_from(code: u8) -> Decision {
    match code % 3 {
        0 => Decision::Pending,
        1 => Decision::Accepted,
        _ => Decision::Rejected,
    }
}

/// Decisions only; timestamps and rationale vary between calls
fn decisions(file: &FileOverlay) -> Vec<(String, Decision)> {
    file.ai_candidates
        .values()
        .map(|c| (c.key().to_string(), c.decision))
        .collect()
}

fn store(dir: &TempDir) -> OverlayStore {
    OverlayStore::new(dir.path(), Duration::from_secs(2))
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_reapply_is_idempotent(
        mappings in prop::collection::vec(prop::option::of(0usize..6), 0..10),
        codes in prop::collection::vec(any::<u8>(), 10),
    ) {
        let plan = make_plan(6);
        let run = make_run(&plan, &mappings);

        let mut file = FileOverlay::default();
        merge_run(&mut file, "run-US-1", &run);
        let keys: Vec<String> = file.ai_candidates.keys().cloned().collect();
        for (key, code) in keys.iter().zip(&codes) {
            decide(&mut file, key, decision_from(*code), None).unwrap();
        }
        let before = file.clone();

        let stats = merge_run(&mut file, "run-US-1", &run);
        prop_assert_eq!(stats.added, 0);
        prop_assert_eq!(stats.existing_changed, 0);
        prop_assert_eq!(decisions(&file), decisions(&before));
        prop_assert_eq!(&file.existing_tests_to_execute, &before.existing_tests_to_execute);
        prop_assert_eq!(&file.existing_tests_to_skip, &before.existing_tests_to_skip);
        prop_assert_eq!(file.applied_runs.len(), 1);
    }

    #[test]
    fn prop_decision_touches_one_candidate(
        count in 1usize..12,
        target in any::<prop::sample::Index>(),
        code in any::<u8>(),
    ) {
        let plan = make_plan(3);
        let run = make_run(&plan, &vec![None; count]);
        let mut file = FileOverlay::default();
        merge_run(&mut file, "run-US-1", &run);
        let before = file.clone();

        let idx = target.index(count);
        let key = format!("C{idx}");
        decide(&mut file, &key, decision_from(code), Some("checked".into())).unwrap();

        for (other, candidate) in &file.ai_candidates {
            if *other != key {
                prop_assert_eq!(candidate, &before.ai_candidates[other]);
            }
        }
        prop_assert_eq!(file.ai_candidates[&key].decision, decision_from(code));
    }

    #[test]
    fn prop_review_iff_pending(codes in prop::collection::vec(any::<u8>(), 0..12)) {
        let plan = make_plan(2);
        let run = make_run(&plan, &vec![None; codes.len()]);
        let mut file = FileOverlay::default();
        merge_run(&mut file, "run-US-1", &run);
        for (i, code) in codes.iter().enumerate() {
            decide(&mut file, &format!("C{i}"), decision_from(*code), None).unwrap();
        }

        let any_pending = codes.iter().any(|c| decision_from(*c) == Decision::Pending);
        let overlay = make_overlay(&plan, "F1", OverlayPayload::File(file));
        let effective = compile(&plan, Some(&overlay));
        let expected = if any_pending { GovernanceStatus::Review } else { GovernanceStatus::Auto };
        prop_assert_eq!(effective.status, expected);
        prop_assert_eq!(effective.tests_pending.is_empty(), !any_pending);
    }

    #[test]
    fn prop_baseline_partitioned(
        size in 1usize..8,
        mappings in prop::collection::vec(prop::option::of(0usize..10), 0..8),
        codes in prop::collection::vec(any::<u8>(), 8),
        overrides in prop::collection::vec((0usize..8, any::<bool>()), 0..4),
    ) {
        let plan = make_plan(size);
        let baseline = plan.clone();
        let run = make_run(&plan, &mappings);

        let mut file = FileOverlay::default();
        merge_run(&mut file, "run-US-1", &run);
        for (i, code) in codes.iter().enumerate().take(mappings.len()) {
            decide(&mut file, &format!("C{i}"), decision_from(*code), None).unwrap();
        }
        for (test, execute) in overrides {
            if test >= size {
                continue;
            }
            let mut entry = ExistingTestEntry::computed(format!("T{test}"), "reviewer override");
            entry.origin = Origin::Human;
            let disposition = if execute { Disposition::Execute } else { Disposition::Skip };
            file.set_existing(disposition, entry);
        }

        let overlay = make_overlay(&plan, "F1", OverlayPayload::File(file));
        let effective = compile(&plan, Some(&overlay));
        prop_assert_eq!(&plan, &baseline);

        for test in &plan.tests {
            let executed = effective.tests_to_execute.iter().filter(|t| *t == test).count();
            let excluded = effective.tests_excluded.iter().filter(|t| *t == test).count();
            prop_assert_eq!(executed + excluded, 1, "{} executed {} excluded {}", test, executed, excluded);
        }
        let unique: BTreeSet<&String> = effective.tests_to_execute.iter().collect();
        prop_assert_eq!(unique.len(), effective.tests_to_execute.len());
    }

    #[test]
    fn prop_explicit_mappings_skip_each_test_once(
        mappings in prop::collection::vec(prop::option::of(0usize..5), 0..10),
    ) {
        let plan = make_plan(5);
        let run = make_run(&plan, &mappings);
        let skipped: BTreeSet<&str> = run.existing_tests_to_skip.iter().map(|e| e.test_key.as_str()).collect();
        prop_assert_eq!(skipped.len(), run.existing_tests_to_skip.len());
        prop_assert_eq!(skipped.len() + run.existing_tests_to_execute.len(), plan.tests.len());

        let mapped: Vec<&str> = run
            .candidate_tests
            .iter()
            .filter_map(|c| c.mapped_existing_test_key.as_deref())
            .collect();
        let distinct: BTreeSet<&str> = mapped.iter().copied().collect();
        prop_assert_eq!(mapped.len(), distinct.len());
        prop_assert_eq!(distinct, skipped);
    }
}

// =============================================================================
// Store Invariants
// =============================================================================

#[tokio::test]
async fn test_kind_binding_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let plan = make_plan(2);
    let run = make_run(&plan, &[Some(0)]);
    {
        let store = store(&dir);
        store
            .put(&plan.key, "R1", None, OverlayPayload::Run(run.clone()))
            .await
            .unwrap();
    }

    let reopened = store(&dir);
    let err = reopened
        .put("OTHER-PLAN", "R1", None, OverlayPayload::File(FileOverlay::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::KindConflict { .. }));
    assert_eq!(err.status(), 409);
    assert_eq!(reopened.kind_of("R1").unwrap(), Some(OverlayKind::Run));
}

#[tokio::test]
async fn test_decision_on_run_overlay_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let plan = make_plan(2);
    store
        .put(&plan.key, "R1", None, OverlayPayload::Run(make_run(&plan, &[None])))
        .await
        .unwrap();

    let err = qaplan::ledger::set_decision(&store, &plan.key, "R1", "C0", Decision::Accepted, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "OverlayKindError");
}

#[tokio::test]
async fn test_unknown_candidate_leaves_overlay_untouched() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let plan = make_plan(2);
    store
        .put(&plan.key, "R1", None, OverlayPayload::Run(make_run(&plan, &[Some(0), None])))
        .await
        .unwrap();
    qaplan::apply::apply_run(&store, &plan.key, "R1", "F1").await.unwrap();
    let before = store.get(&plan.key, "F1").unwrap();

    let err = qaplan::ledger::set_decision(&store, &plan.key, "F1", "C9", Decision::Accepted, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::NotFound { what: "candidate", .. }));
    assert_eq!(store.get(&plan.key, "F1").unwrap(), before);
}

#[tokio::test]
async fn test_apply_from_file_overlay_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let plan = make_plan(2);
    store
        .put(&plan.key, "F0", None, OverlayPayload::File(FileOverlay::default()))
        .await
        .unwrap();

    let err = qaplan::apply::apply_run(&store, &plan.key, "F0", "F1").await.unwrap_err();
    assert!(matches!(
        err,
        PlanError::OverlayKind {
            expected: OverlayKind::Run,
            ..
        }
    ));
    assert!(store.find(&plan.key, "F1").unwrap().is_none());
}

#[tokio::test]
async fn test_export_into_file_bound_name_writes_nothing() {
    let ws = common::Workspace::new();
    let service = ws.service();
    service
        .store()
        .put("TP-009", "run-US-1", None, OverlayPayload::File(FileOverlay::default()))
        .await
        .unwrap();

    let request: ExportRunRequest = serde_json::from_value(common::scenario_export()).unwrap();
    let err = service.export_run("US-1", request).await.unwrap_err();
    assert!(matches!(
        err,
        PlanError::KindConflict {
            existing: OverlayKind::File,
            requested: OverlayKind::Run,
            ..
        }
    ));
    assert!(service.runs().unwrap().is_empty());
    assert!(service.store().load_run("US-1").unwrap().is_none());
    assert!(!ws.data_dir().join("prompts").exists());
    assert!(service.store().find("PLAN-1", "run-US-1").unwrap().is_none());
}

// =============================================================================
// End-to-end Scenario
// =============================================================================

#[tokio::test]
async fn test_review_scenario_through_service() {
    let ws = common::Workspace::new();
    let service = ws.service();

    let request: ExportRunRequest = serde_json::from_value(common::scenario_export()).unwrap();
    let outcome = service.export_run("US-1", request).await.unwrap();
    assert_eq!(outcome.run_overlay, "run-US-1");
    assert_eq!(outcome.refreshed_plans, vec!["PLAN-1"]);
    assert!(!outcome.overwrote);

    let preview = service.effective("PLAN-1", Some("run-US-1")).await.unwrap();
    assert!(!preview.binding);
    assert_eq!(preview.status, GovernanceStatus::Review);
    assert_eq!(preview.tests_excluded, vec!["T1"]);

    service.apply_run("PLAN-1", "run-US-1", "F1").await.unwrap();
    service
        .set_decision("PLAN-1", "F1", "C2", "ACCEPTED", Some("new coverage".into()))
        .await
        .unwrap();

    let effective = service.effective("PLAN-1", Some("F1")).await.unwrap();
    assert!(effective.binding);
    assert_eq!(effective.tests_to_execute, vec!["T2", "C2"]);
    assert_eq!(effective.tests_excluded, vec!["T1"]);
    assert_eq!(effective.tests_pending, vec!["C1"]);
    assert_eq!(effective.tests_accepted, vec!["C2"]);
    assert_eq!(effective.status, GovernanceStatus::Review);
    assert_eq!(effective.summary.effective_total, 2);
    assert_eq!(effective.traceability.runs, vec!["run-US-1"]);

    // re-export + re-apply keeps the decision
    let request: ExportRunRequest = serde_json::from_value(common::scenario_export()).unwrap();
    let again = service.export_run("US-1", request).await.unwrap();
    assert!(again.overwrote);
    let file = service.apply_run("PLAN-1", "run-US-1", "F1").await.unwrap();
    assert_eq!(file.ai_candidates["C2"].decision, Decision::Accepted);
    assert_eq!(file.ai_candidates["C1"].decision, Decision::Pending);

    service.set_decision("PLAN-1", "F1", "C1", "rejected", None).await.unwrap();
    let done = service.effective("PLAN-1", Some("F1")).await.unwrap();
    assert_eq!(done.status, GovernanceStatus::Auto);
    assert_eq!(done.tests_rejected, vec!["C1"]);

    // the baseline stays untouched
    let baseline = service.effective("PLAN-1", None).await.unwrap();
    assert_eq!(baseline.tests_to_execute, vec!["T1", "T2"]);
    assert_eq!(baseline.status, GovernanceStatus::NotAnalyzed);
}
