// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Export a generation run from a JSON file

use anyhow::{Context as _, Result};
use std::path::Path;

use super::{block_on, Context};
use crate::service::ExportRunRequest;

/// Read an export body from `file` and store it as the run of `jira_key`
pub fn run(ctx: &Context, jira_key: &str, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let request: ExportRunRequest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let service = ctx.service()?;
    let outcome = block_on(service.export_run(jira_key, request))?
        .with_context(|| format!("Failed to export run for {jira_key}"))?;
    if ctx.json {
        return ctx.print_json(&outcome);
    }
    let verb = if outcome.overwrote { "Replaced" } else { "Stored" };
    println!("{verb} run for {} ({} candidates)", outcome.jira_key, outcome.candidates);
    println!("  Prompt: {}", outcome.prompt_hash);
    println!("  Schema: {}", outcome.schema_hash);
    if outcome.refreshed_plans.is_empty() {
        println!("  No catalog plan links {jira_key}; no run overlay refreshed");
    } else {
        println!(
            "  Refreshed {} for: {}",
            outcome.run_overlay,
            outcome.refreshed_plans.join(", ")
        );
    }
    Ok(())
}

/// List stored runs
pub fn list(ctx: &Context) -> Result<()> {
    let service = ctx.service()?;
    let runs = service.runs().context("Failed to list runs")?;
    if ctx.json {
        return ctx.print_json(&runs);
    }
    if runs.is_empty() {
        println!("No runs exported yet.");
    }
    for run in runs {
        println!(
            "{:<12} {}  {:>3} suggestions  {}",
            run.jira_key,
            run.generated_at.format("%Y-%m-%d %H:%M"),
            run.suggestions,
            run.prompt_hash
        );
    }
    Ok(())
}
