// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Apply a run overlay into a file overlay

use anyhow::{Context as _, Result};

use super::{block_on, Context};
use crate::types::GovernanceStatus;

/// Copy the candidates of `run` into `overlay` for plan `key`
pub fn run(ctx: &Context, key: &str, run: &str, overlay: &str) -> Result<()> {
    let service = ctx.service()?;
    let file = block_on(service.apply_run(key, run, overlay))?
        .with_context(|| format!("Failed to apply run {run} into {overlay}"))?;
    if ctx.json {
        return ctx.print_json(&file);
    }
    println!("Applied {run} into {overlay} for {key}");
    println!(
        "  Candidates: {} ({} pending)",
        file.ai_candidates.len(),
        file.pending_count()
    );
    println!("  Status: {}", ctx.status(GovernanceStatus::of_file(&file)));
    println!();
    println!("Use 'qaplan decide {key} --overlay {overlay} --candidate <KEY> --decision ACCEPTED' to review");
    Ok(())
}
