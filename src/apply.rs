// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Apply a run overlay into a file overlay
//!
//! Candidates are upserted by `candidate_key`: new keys arrive `PENDING`,
//! known keys get the run's latest content but keep their decision. The
//! run's execute/skip partition is merged without touching reviewer
//! overrides.

use chrono::Utc;

use crate::error::{PlanError, PlanResult};
use crate::store::OverlayStore;
use crate::types::{AiCandidate, AppliedRun, Disposition, FileOverlay, OverlayKind, OverlayPayload, RunOverlay};

/// Counts reported after an apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Candidates added as pending
    pub added: usize,
    /// Known candidates refreshed in place
    pub refreshed: usize,
    /// Existing-test entries that changed
    pub existing_changed: usize,
}

/// Merge `run` (stored as `run_name`) into `file`
pub fn merge_run(file: &mut FileOverlay, run_name: &str, run: &RunOverlay) -> ApplyStats {
    let mut stats = ApplyStats::default();

    for candidate in &run.candidate_tests {
        match file.ai_candidates.get_mut(&candidate.candidate_key) {
            Some(existing) => {
                existing.candidate = candidate.clone();
                existing.source_run = Some(run_name.to_string());
                stats.refreshed += 1;
            }
            None => {
                file.ai_candidates.insert(
                    candidate.candidate_key.clone(),
                    AiCandidate::pending(candidate.clone(), Some(run_name.to_string())),
                );
                stats.added += 1;
            }
        }
    }

    let partition = run
        .existing_tests_to_execute
        .iter()
        .map(|e| (Disposition::Execute, e))
        .chain(run.existing_tests_to_skip.iter().map(|e| (Disposition::Skip, e)));
    for (disposition, entry) in partition {
        if file.set_existing(disposition, entry.clone()) {
            stats.existing_changed += 1;
        }
    }

    let record = AppliedRun {
        run_overlay: run_name.to_string(),
        jira_key: run.jira_key.clone(),
        prompt_hash: run.provenance.prompt_hash.clone(),
        applied_at: Utc::now(),
    };
    match file.applied_runs.iter_mut().find(|r| r.run_overlay == run_name) {
        Some(existing) => *existing = record,
        None => file.applied_runs.push(record),
    }
    stats
}

/// Apply run overlay `run_name` of a plan into file overlay `target`.
///
/// The target is created as a file overlay when it does not exist yet.
pub async fn apply_run(
    store: &OverlayStore,
    plan_key: &str,
    run_name: &str,
    target: &str,
) -> PlanResult<FileOverlay> {
    if let Some(actual) = store.kind_of(run_name)? {
        if actual != OverlayKind::Run {
            return Err(PlanError::OverlayKind {
                name: run_name.to_string(),
                expected: OverlayKind::Run,
                actual,
            });
        }
    }
    let run = match store.get(plan_key, run_name)?.payload {
        OverlayPayload::Run(run) => run,
        OverlayPayload::File(_) => {
            return Err(PlanError::OverlayKind {
                name: run_name.to_string(),
                expected: OverlayKind::Run,
                actual: OverlayKind::File,
            })
        }
    };

    let mut stats = ApplyStats::default();
    let overlay = store
        .update(plan_key, target, OverlayKind::File, |current| {
            let mut file = match current {
                Some(OverlayPayload::File(file)) => file,
                Some(OverlayPayload::Run(_)) => {
                    return Err(PlanError::OverlayKind {
                        name: target.to_string(),
                        expected: OverlayKind::File,
                        actual: OverlayKind::Run,
                    })
                }
                None => FileOverlay::default(),
            };
            stats = merge_run(&mut file, run_name, &run);
            Ok(OverlayPayload::File(file))
        })
        .await?;

    tracing::info!(
        plan_key,
        run = run_name,
        overlay = target,
        added = stats.added,
        refreshed = stats.refreshed,
        existing_changed = stats.existing_changed,
        "run applied"
    );
    match overlay.payload {
        OverlayPayload::File(file) => Ok(file),
        OverlayPayload::Run(_) => Err(PlanError::Storage(format!("overlay '{target}' was written with the wrong kind"))),
    }
}
