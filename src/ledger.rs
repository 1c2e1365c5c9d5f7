// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Decision ledger
//!
//! Human verdicts live only in file overlays. A decision touches exactly one
//! candidate; an existing-test override touches exactly one test key.

use chrono::Utc;

use crate::error::{PlanError, PlanResult};
use crate::store::OverlayStore;
use crate::types::{Decision, Disposition, ExistingTestEntry, FileOverlay, Origin, OverlayKind, OverlayPayload};

/// Record `decision` for one candidate. Returns whether anything changed.
pub fn decide(
    file: &mut FileOverlay,
    candidate_key: &str,
    decision: Decision,
    rationale: Option<String>,
) -> PlanResult<bool> {
    let candidate = file
        .ai_candidates
        .get_mut(candidate_key)
        .ok_or_else(|| PlanError::not_found("candidate", candidate_key))?;
    let rationale = rationale.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    if candidate.decision == decision && candidate.rationale == rationale {
        return Ok(false);
    }
    candidate.decision = decision;
    candidate.rationale = rationale;
    candidate.decided_at = Some(Utc::now());
    Ok(true)
}

fn file_payload(name: &str, current: Option<OverlayPayload>, create: bool) -> PlanResult<FileOverlay> {
    match current {
        Some(OverlayPayload::File(file)) => Ok(file),
        Some(OverlayPayload::Run(_)) => Err(PlanError::OverlayKind {
            name: name.to_string(),
            expected: OverlayKind::File,
            actual: OverlayKind::Run,
        }),
        None if create => Ok(FileOverlay::default()),
        None => Err(PlanError::not_found("overlay", name)),
    }
}

fn into_file(name: &str, payload: OverlayPayload) -> PlanResult<FileOverlay> {
    match payload {
        OverlayPayload::File(file) => Ok(file),
        OverlayPayload::Run(_) => Err(PlanError::OverlayKind {
            name: name.to_string(),
            expected: OverlayKind::File,
            actual: OverlayKind::Run,
        }),
    }
}

/// Set the decision of one candidate in an existing file overlay
pub async fn set_decision(
    store: &OverlayStore,
    plan_key: &str,
    overlay: &str,
    candidate_key: &str,
    decision: Decision,
    rationale: Option<String>,
) -> PlanResult<FileOverlay> {
    let mut changed = false;
    let written = store
        .update(plan_key, overlay, OverlayKind::File, |current| {
            let mut file = file_payload(overlay, current, false)?;
            changed = decide(&mut file, candidate_key, decision, rationale)?;
            Ok(OverlayPayload::File(file))
        })
        .await?;
    tracing::info!(plan_key, overlay, candidate = candidate_key, %decision, changed, "decision recorded");
    into_file(overlay, written.payload)
}

/// Record a reviewer execute/skip override for one existing test.
///
/// The file overlay is created when missing. The caller checks that
/// `test_key` belongs to the baseline.
pub async fn set_existing_override(
    store: &OverlayStore,
    plan_key: &str,
    overlay: &str,
    test_key: &str,
    disposition: Disposition,
    reason: Option<String>,
) -> PlanResult<FileOverlay> {
    let entry = ExistingTestEntry {
        test_key: test_key.to_string(),
        reason: reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "reviewer override".to_string()),
        evidence: None,
        origin: Origin::Human,
    };
    let written = store
        .update(plan_key, overlay, OverlayKind::File, |current| {
            let mut file = file_payload(overlay, current, true)?;
            file.set_existing(disposition, entry);
            Ok(OverlayPayload::File(file))
        })
        .await?;
    tracing::info!(plan_key, overlay, test_key, ?disposition, "existing-test override recorded");
    into_file(overlay, written.payload)
}
