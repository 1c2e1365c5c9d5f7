// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Baseline plan resolution
//!
//! The baseline is recomputed from upstream data on every read and is never
//! written anywhere.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PlanError, PlanResult};
use crate::types::Plan;
use crate::upstream::{guarded, PlanRecord, Upstream};

/// Builds baseline plans from the upstream catalog
#[derive(Clone)]
pub struct Resolver {
    upstream: Arc<dyn Upstream>,
    budget: Duration,
}

impl Resolver {
    /// Resolver over `upstream`, each call bounded by `budget`
    pub fn new(upstream: Arc<dyn Upstream>, budget: Duration) -> Self {
        Self { upstream, budget }
    }

    /// Upstream handle
    #[must_use]
    pub fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.upstream
    }

    /// Per-call budget
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// All baseline plans, without Xray titles
    pub async fn list(&self) -> PlanResult<Vec<Plan>> {
        let records = guarded("xray", self.budget, self.upstream.plans()).await?;
        Ok(records.into_iter().map(baseline_from_record).collect())
    }

    /// Resolve one baseline plan, including Xray titles of its tests
    pub async fn resolve(&self, plan_key: &str) -> PlanResult<Plan> {
        let plan_key = plan_key.trim();
        let records = guarded("xray", self.budget, self.upstream.plans()).await?;
        let record = records
            .into_iter()
            .find(|p| p.key.trim() == plan_key)
            .ok_or_else(|| PlanError::not_found("plan", plan_key))?;

        let mut plan = baseline_from_record(record);
        let mut titles = BTreeMap::new();
        for jira_key in &plan.jira_keys {
            let tests = guarded("xray", self.budget, self.upstream.xray_tests(jira_key)).await?;
            for test in tests {
                if plan.tests.contains(&test.key) && !test.summary.trim().is_empty() {
                    titles.entry(test.key).or_insert(test.summary);
                }
            }
        }
        plan.test_titles = titles;
        tracing::debug!(
            plan_key,
            tests = plan.tests.len(),
            jira_keys = plan.jira_keys.len(),
            "resolved baseline"
        );
        Ok(plan)
    }
}

fn baseline_from_record(record: PlanRecord) -> Plan {
    let mut jira_keys: Vec<String> = Vec::with_capacity(record.jira_keys.len());
    for key in record.jira_keys {
        let key = key.trim().to_string();
        if !key.is_empty() && !jira_keys.contains(&key) {
            jira_keys.push(key);
        }
    }
    let tests: BTreeSet<String> = record
        .tests
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    Plan {
        key: record.key.trim().to_string(),
        summary: record.summary,
        jira_keys,
        tests,
        test_titles: BTreeMap::new(),
    }
}
