// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell

use anyhow::{Context as _, Result};

use super::Context;

/// Print the resolved configuration (secrets redacted), or one key of it
pub fn run(ctx: &Context, key: Option<&str>) -> Result<()> {
    let redacted = ctx.config.redacted();
    if ctx.json {
        return ctx.print_json(&redacted);
    }
    let value = toml::Value::try_from(&redacted).context("Failed to render configuration")?;
    match key {
        None => print!("{}", toml::to_string_pretty(&value)?),
        Some(key) => {
            let found = key
                .split('.')
                .try_fold(&value, |v, part| v.get(part))
                .with_context(|| format!("Unknown configuration key: {key}"))?;
            match found {
                toml::Value::String(s) => println!("{s}"),
                other => println!("{other}"),
            }
        }
    }
    Ok(())
}
