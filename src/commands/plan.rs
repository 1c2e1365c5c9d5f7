// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Read-only plan commands: keys, catalog, baseline, overlays, effective plan

use anyhow::{Context as _, Result};

use super::{block_on, Context};
use crate::types::{EffectivePlan, OverlayPayload};

/// List Jira issue keys
pub fn keys(ctx: &Context) -> Result<()> {
    let service = ctx.service()?;
    let keys = block_on(service.issue_keys())?.context("Failed to list Jira keys")?;
    if ctx.json {
        return ctx.print_json(&keys);
    }
    for key in keys {
        println!("{key}");
    }
    Ok(())
}

/// List baseline plans with their status under `overlay`
pub fn list(ctx: &Context, overlay: Option<&str>) -> Result<()> {
    let service = ctx.service()?;
    let plans = block_on(service.list_plans(overlay))?.context("Failed to list plans")?;
    if ctx.json {
        return ctx.print_json(&plans);
    }
    if plans.is_empty() {
        println!("No test plans found.");
        return Ok(());
    }
    for plan in plans {
        println!(
            "{:<16} {:<13} {:>3} tests  {}",
            plan.key,
            ctx.status(plan.overlay_status),
            plan.tests_count,
            plan.summary
        );
    }
    Ok(())
}

/// Show one plan, with the overlay document when selected
pub fn show(ctx: &Context, key: &str, overlay: Option<&str>) -> Result<()> {
    let service = ctx.service()?;
    let view = block_on(service.plan(key, overlay))?.with_context(|| format!("Failed to load plan {key}"))?;
    if ctx.json {
        return ctx.print_json(&view);
    }
    println!("{} {}", ctx.heading(&view.plan.key), view.plan.summary);
    println!("  Jira keys: {}", view.plan.jira_keys.join(", "));
    println!("  Status:    {}", ctx.status(view.status));
    println!("  Baseline tests ({}):", view.plan.tests.len());
    for test in &view.plan.tests {
        match view.plan.test_titles.get(test) {
            Some(title) => println!("    {test}  {title}"),
            None => println!("    {test}"),
        }
    }
    match view.overlay.as_ref().map(|o| &o.payload) {
        Some(OverlayPayload::File(file)) => {
            println!("  Candidates: {} ({} pending)", file.ai_candidates.len(), file.pending_count());
            println!("  New tests to create: {}", file.new_tests_to_create.len());
        }
        Some(OverlayPayload::Run(run)) => {
            println!("  Run {} generated {}", run.jira_key, run.generated_at.format("%Y-%m-%d %H:%M"));
            println!("  Candidates: {}", run.candidate_tests.len());
        }
        None if overlay.is_some() => println!("  Overlay has no entry for this plan yet."),
        None => {}
    }
    Ok(())
}

/// List overlays
pub fn overlays(ctx: &Context) -> Result<()> {
    let service = ctx.service()?;
    let overlays = service.overlays().context("Failed to list overlays")?;
    if ctx.json {
        return ctx.print_json(&overlays);
    }
    if overlays.is_empty() {
        println!("No overlays yet.");
    }
    for overlay in overlays {
        println!("{:<5} {:<24} {}", overlay.kind, overlay.name, overlay.label);
    }
    Ok(())
}

fn print_effective(ctx: &Context, plan: &EffectivePlan) {
    let overlay = plan.overlay.as_deref().unwrap_or("(baseline)");
    println!("{} via {} [{}]", ctx.heading(&plan.plan_key), overlay, ctx.status(plan.status));
    if !plan.binding {
        println!("  preview only: run overlays are not binding");
    }
    let section = |title: &str, items: &[String]| {
        println!("  {title} ({}):", items.len());
        for item in items {
            println!("    {item}");
        }
    };
    section("Execute", &plan.tests_to_execute);
    section("Excluded", &plan.tests_excluded);
    section("Pending", &plan.tests_pending);
    section("Rejected", &plan.tests_rejected);
    println!("  Missing ({}):", plan.tests_missing.len());
    for test in &plan.tests_missing {
        println!("    {}  {}", test.jira_key, test.title);
    }
}

/// Compile and print the effective plan
pub fn effective(ctx: &Context, key: &str, overlay: Option<&str>) -> Result<()> {
    let service = ctx.service()?;
    let plan = block_on(service.effective(key, overlay))?
        .with_context(|| format!("Failed to compile effective plan for {key}"))?;
    if ctx.json {
        return ctx.print_json(&plan);
    }
    print_effective(ctx, &plan);
    Ok(())
}
