// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Generate a test plan with the configured LLM provider

use anyhow::{Context as _, Result};

use super::{block_on, Context};
use crate::service::ExportRunRequest;

/// Generate for `jira_key`; with `export`, store the result as a run
pub fn run(ctx: &Context, jira_key: &str, export: bool) -> Result<()> {
    let service = ctx.service()?;
    let response = block_on(service.generate(jira_key))?
        .with_context(|| format!("Failed to generate a test plan for {jira_key}"))?;

    let outcome = if export {
        let request = ExportRunRequest::from_response(&response);
        Some(
            block_on(service.export_run(jira_key, request))?
                .with_context(|| format!("Failed to export run for {jira_key}"))?,
        )
    } else {
        None
    };

    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "plan": response, "export": outcome }));
    }
    println!("{}", response.markdown);
    println!();
    println!("{}", ctx.heading(&format!("Suggestions ({})", response.suggestions.len())));
    for suggestion in &response.suggestions {
        println!("  [{}] {}", suggestion.priority, suggestion.title);
    }
    if let Some(outcome) = outcome {
        println!();
        println!("Exported as {} ({} plans refreshed)", outcome.run_overlay, outcome.refreshed_plans.len());
    }
    Ok(())
}
