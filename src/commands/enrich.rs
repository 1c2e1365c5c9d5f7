// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Recompute baseline governance into a file overlay

use anyhow::{Context as _, Result};

use super::{block_on, Context};

/// Run the enrich rules for `key` into `overlay`
pub fn run(ctx: &Context, key: &str, overlay: &str) -> Result<()> {
    let service = ctx.service()?;
    let file = block_on(service.enrich(key, overlay))?
        .with_context(|| format!("Failed to enrich {key} into overlay {overlay}"))?;
    if ctx.json {
        return ctx.print_json(&file);
    }
    println!("Enriched {key} into overlay {overlay}");
    println!("  Execute: {}", file.existing_tests_to_execute.len());
    println!("  Skip:    {}", file.existing_tests_to_skip.len());
    for entry in &file.existing_tests_to_skip {
        println!("    {}  {}", entry.test_key, entry.reason);
    }
    println!("  Create:  {}", file.new_tests_to_create.len());
    if !file.signals.is_empty() {
        println!("  Signals: {}", file.signals.join(", "));
    }
    Ok(())
}
