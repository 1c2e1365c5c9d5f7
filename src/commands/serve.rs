// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Serve the HTTP API

use anyhow::Result;
use std::sync::Arc;

use super::{block_on, Context};

/// Run the server, optionally on another address
pub fn run(ctx: &Context, bind: Option<String>) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(bind) = bind {
        config.bind = bind;
    }
    let service = Arc::new(crate::service::PlanService::from_config(config)?);
    block_on(crate::server::serve(service))?
}
