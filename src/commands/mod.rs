// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Command implementations

pub mod apply;
pub mod completions;
pub mod config;
pub mod decide;
pub mod enrich;
pub mod export;
pub mod generate;
pub mod plan;
pub mod serve;

use anyhow::{Context as _, Result};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::future::Future;

use crate::config::Config;
use crate::service::PlanService;
use crate::types::GovernanceStatus;

/// Shared state of one CLI invocation
pub struct Context {
    /// Resolved configuration
    pub config: Config,
    /// Print JSON instead of text
    pub json: bool,
    /// Colorize text output
    pub color: bool,
}

impl Context {
    /// Service over the resolved configuration
    pub fn service(&self) -> Result<PlanService> {
        PlanService::from_config(self.config.clone()).context("Failed to initialise plan service")
    }

    /// Print `value` as pretty JSON
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Status label, colored when enabled
    #[must_use]
    pub fn status(&self, status: GovernanceStatus) -> String {
        let label = status.to_string();
        if !self.color {
            return label;
        }
        match status {
            GovernanceStatus::NotAnalyzed => label.dimmed().to_string(),
            GovernanceStatus::Review => label.yellow().to_string(),
            GovernanceStatus::Auto => label.green().to_string(),
        }
    }

    /// Section heading, bold when enabled
    #[must_use]
    pub fn heading(&self, text: &str) -> String {
        if self.color {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }
}

/// Run a future on a fresh multi-threaded runtime
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
