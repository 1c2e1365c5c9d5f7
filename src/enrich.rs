// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Rules-based baseline governance
//!
//! For every Jira key `J` linked to the plan, with Xray tests `X(J)`:
//! baseline tests named `TEST-<num(J)>-*` are executed when `X(J)` has them
//! and skipped as `missing_in_xray` otherwise; baseline tests whose Xray
//! summary or steps mention "outdated" are skipped as `outdated_test`; an
//! issue without any Xray test gets a regression test to create.
//!
//! The result only fills gaps in a file overlay: reviewer overrides and
//! reviewer-edited new tests are left alone.

use indexmap::IndexMap;

use crate::error::PlanResult;
use crate::resolver::Resolver;
use crate::types::{Disposition, ExistingTestEntry, FileOverlay, NewTest, Plan, Priority};
use crate::upstream::{guarded, XrayTest};

const SKIP_SIGNAL: &str = "skip_count:";
const CREATE_SIGNAL: &str = "new_tests_to_create:";

/// Entries computed by the enrich rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    /// `test_key -> (disposition, entry)`, first placement order
    pub existing: IndexMap<String, (Disposition, ExistingTestEntry)>,
    /// Tests to create, one per uncovered Jira key
    pub new_tests: Vec<NewTest>,
}

impl Enrichment {
    /// Summary signals (`skip_count:N`, `new_tests_to_create:N`)
    #[must_use]
    pub fn signals(&self) -> Vec<String> {
        let skips = self
            .existing
            .values()
            .filter(|(d, _)| *d == Disposition::Skip)
            .count();
        let mut out = Vec::new();
        if skips > 0 {
            out.push(format!("{SKIP_SIGNAL}{skips}"));
        }
        if !self.new_tests.is_empty() {
            out.push(format!("{CREATE_SIGNAL}{}", self.new_tests.len()));
        }
        out
    }
}

fn issue_number(jira_key: &str) -> &str {
    jira_key.rsplit('-').next().unwrap_or(jira_key)
}

fn missing_coverage(jira_key: &str) -> NewTest {
    NewTest {
        jira_key: jira_key.to_string(),
        title: format!("{jira_key} - Missing coverage: create baseline regression test"),
        priority: Priority::High,
        tags: vec!["regression".to_string()],
        given: "A user is authenticated and has access to the feature".to_string(),
        when: "The user executes the feature described in the Jira story".to_string(),
        then: "The outcome matches the acceptance criteria and errors are handled cleanly".to_string(),
    }
}

/// Apply the rules to a plan and the Xray tests of each of its Jira keys
#[must_use]
pub fn rules(plan: &Plan, xray: &[(String, Vec<XrayTest>)]) -> Enrichment {
    let mut out = Enrichment::default();

    for (jira_key, tests) in xray {
        let prefix = format!("TEST-{}-", issue_number(jira_key));
        for test_key in plan.tests.iter().filter(|t| t.starts_with(&prefix)) {
            if out.existing.contains_key(test_key) {
                continue;
            }
            let placed = if tests.iter().any(|t| &t.key == test_key) {
                (Disposition::Execute, ExistingTestEntry::computed(test_key.clone(), "in_xray"))
            } else {
                (
                    Disposition::Skip,
                    ExistingTestEntry::computed(test_key.clone(), "missing_in_xray")
                        .with_evidence(format!("not found under {jira_key} in Xray")),
                )
            };
            out.existing.insert(test_key.clone(), placed);
        }

        if tests.is_empty() && !out.new_tests.iter().any(|n| &n.jira_key == jira_key) {
            out.new_tests.push(missing_coverage(jira_key));
        }

        for test in tests {
            let text = format!("{}\n{}", test.summary, test.steps.as_deref().unwrap_or_default()).to_lowercase();
            if !text.contains("outdated") || !plan.tests.contains(&test.key) {
                continue;
            }
            let already_skipped = matches!(out.existing.get(&test.key), Some((Disposition::Skip, _)));
            if !already_skipped {
                out.existing.insert(
                    test.key.clone(),
                    (
                        Disposition::Skip,
                        ExistingTestEntry::computed(test.key.clone(), "outdated_test")
                            .with_evidence("summary or steps mention 'outdated'"),
                    ),
                );
            }
        }
    }
    out
}

/// Fetch Xray tests for every linked key and apply the rules
pub async fn compute(resolver: &Resolver, plan: &Plan) -> PlanResult<Enrichment> {
    let mut xray = Vec::with_capacity(plan.jira_keys.len());
    for jira_key in &plan.jira_keys {
        let tests = guarded("xray", resolver.budget(), resolver.upstream().xray_tests(jira_key)).await?;
        xray.push((jira_key.clone(), tests));
    }
    Ok(rules(plan, &xray))
}

/// Merge computed entries into a file overlay, filling gaps only.
///
/// Returns the number of entries that changed.
pub fn merge_into(file: &mut FileOverlay, enrichment: Enrichment) -> usize {
    let signals = enrichment.signals();
    let mut changed = 0;
    for (_, (disposition, entry)) in enrichment.existing {
        if file.set_existing(disposition, entry) {
            changed += 1;
        }
    }
    for new_test in enrichment.new_tests {
        if !file.new_tests_to_create.iter().any(|n| n.jira_key == new_test.jira_key) {
            file.new_tests_to_create.push(new_test);
            changed += 1;
        }
    }
    file.signals
        .retain(|s| !s.starts_with(SKIP_SIGNAL) && !s.starts_with(CREATE_SIGNAL));
    file.signals.extend(signals);
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Origin;
    use std::collections::BTreeMap;

    fn xt(key: &str, summary: &str) -> XrayTest {
        XrayTest {
            key: key.into(),
            summary: summary.into(),
            steps: None,
        }
    }

    fn plan() -> Plan {
        Plan {
            key: "TP-001".into(),
            summary: "Login".into(),
            jira_keys: vec!["US-401".into(), "US-402".into()],
            tests: ["TEST-401-1", "TEST-401-2", "TEST-401-3", "TEST-999-1"]
                .into_iter()
                .map(String::from)
                .collect(),
            test_titles: BTreeMap::new(),
        }
    }

    fn xray() -> Vec<(String, Vec<XrayTest>)> {
        vec![
            (
                "US-401".into(),
                vec![xt("TEST-401-1", "login"), xt("TEST-401-3", "OUTDATED flow")],
            ),
            ("US-402".into(), vec![]),
        ]
    }

    #[test]
    fn test_rules() {
        let out = rules(&plan(), &xray());
        let disposition = |k: &str| out.existing.get(k).map(|(d, e)| (*d, e.reason.as_str()));
        assert_eq!(disposition("TEST-401-1"), Some((Disposition::Execute, "in_xray")));
        assert_eq!(disposition("TEST-401-2"), Some((Disposition::Skip, "missing_in_xray")));
        assert_eq!(disposition("TEST-401-3"), Some((Disposition::Skip, "outdated_test")));
        assert_eq!(disposition("TEST-999-1"), None);
        assert_eq!(out.new_tests.len(), 1);
        assert_eq!(out.new_tests[0].jira_key, "US-402");
        assert_eq!(out.signals(), vec!["skip_count:2", "new_tests_to_create:1"]);
    }

    #[test]
    fn test_merge_fills_gaps_only() {
        let mut file = FileOverlay::default();
        let mut human = ExistingTestEntry::computed("TEST-401-2", "still relevant");
        human.origin = Origin::Human;
        file.set_existing(Disposition::Execute, human);
        file.new_tests_to_create.push(NewTest {
            title: "edited by reviewer".into(),
            ..missing_coverage("US-402")
        });

        merge_into(&mut file, rules(&plan(), &xray()));
        assert_eq!(
            file.existing_entry("TEST-401-2").map(|(d, e)| (d, e.origin)),
            Some((Disposition::Execute, Origin::Human))
        );
        assert_eq!(file.new_tests_to_create.len(), 1);
        assert_eq!(file.new_tests_to_create[0].title, "edited by reviewer");

        // second run changes nothing
        let before = file.clone();
        assert_eq!(merge_into(&mut file, rules(&plan(), &xray())), 0);
        assert_eq!(file, before);
    }
}
