// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Reviewer decisions: candidate verdicts and existing-test overrides

use anyhow::{Context as _, Result};

use super::{block_on, Context};
use crate::types::GovernanceStatus;

/// Record a decision for one candidate
pub fn candidate(
    ctx: &Context,
    key: &str,
    overlay: &str,
    candidate_key: &str,
    decision: &str,
    rationale: Option<String>,
) -> Result<()> {
    let service = ctx.service()?;
    let file = block_on(service.set_decision(key, overlay, candidate_key, decision, rationale))?
        .with_context(|| format!("Failed to record decision for {candidate_key}"))?;
    if ctx.json {
        return ctx.print_json(&file);
    }
    let recorded = file
        .ai_candidates
        .get(candidate_key)
        .map(|c| c.decision.to_string())
        .unwrap_or_default();
    println!("{candidate_key}: {recorded}");
    println!(
        "  Overlay {overlay}: {} pending, status {}",
        file.pending_count(),
        ctx.status(GovernanceStatus::of_file(&file))
    );
    Ok(())
}

/// Record an execute/skip override for a baseline test
pub fn existing(
    ctx: &Context,
    key: &str,
    overlay: &str,
    test_key: &str,
    disposition: &str,
    reason: Option<String>,
) -> Result<()> {
    let service = ctx.service()?;
    let file = block_on(service.set_existing(key, overlay, test_key, disposition, reason))?
        .with_context(|| format!("Failed to record override for {test_key}"))?;
    if ctx.json {
        return ctx.print_json(&file);
    }
    match file.existing_entry(test_key) {
        Some((disposition, entry)) => println!("{test_key}: {disposition:?} ({})", entry.reason),
        None => println!("{test_key}: unchanged"),
    }
    Ok(())
}
