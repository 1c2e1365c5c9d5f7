// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Candidate reconciliation
//!
//! Maps AI candidates onto baseline tests and derives the default
//! execute/skip partition of a run. Explicit `mapped_existing_test_key`
//! links are resolved for every candidate before any title matching, so an
//! explicit link always beats a fuzzy one. When two candidates land on the
//! same baseline test the first (input order) keeps it and the others are
//! demoted to unmapped.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::llm::TestCaseSuggestion;
use crate::types::{CandidateTest, ExistingTestEntry, Plan, Priority, Provenance, RunOverlay, TestType};

/// Minimum token overlap (Jaccard) for a title match
pub const TITLE_MATCH_THRESHOLD: f64 = 0.8;

/// Reconciled candidates and default partition of the baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Every candidate, with its resolved mapping
    pub candidate_tests: Vec<CandidateTest>,
    /// Baseline tests no candidate claimed
    pub existing_tests_to_execute: Vec<ExistingTestEntry>,
    /// Baseline tests claimed by a candidate
    pub existing_tests_to_skip: Vec<ExistingTestEntry>,
}

impl Reconciliation {
    /// Wrap as a run overlay payload
    #[must_use]
    pub fn into_run(self, jira_key: &str, generated_at: DateTime<Utc>, provenance: Provenance) -> RunOverlay {
        RunOverlay {
            jira_key: jira_key.to_string(),
            generated_at,
            provenance,
            candidate_tests: self.candidate_tests,
            existing_tests_to_execute: self.existing_tests_to_execute,
            existing_tests_to_skip: self.existing_tests_to_skip,
        }
    }
}

/// Lowercase alphanumeric tokens separated by single spaces
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let common = a.intersection(b).count();
    let union = a.union(b).count();
    #[allow(clippy::cast_precision_loss)]
    let score = common as f64 / union as f64;
    score
}

fn tokens(title: &str) -> BTreeSet<String> {
    normalize_title(title).split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Link {
    Explicit,
    Title,
}

/// Reconcile `candidates` against the baseline of `plan`
#[must_use]
pub fn reconcile(plan: &Plan, candidates: Vec<CandidateTest>) -> Reconciliation {
    let mut candidates = candidates;
    // test_key -> (candidate index, link)
    let mut claims: BTreeMap<String, (usize, Link)> = BTreeMap::new();
    let mut resolved = vec![false; candidates.len()];

    for (idx, candidate) in candidates.iter_mut().enumerate() {
        let Some(key) = candidate
            .mapped_existing_test_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
        else {
            candidate.mapped_existing_test_key = None;
            continue;
        };
        resolved[idx] = true;
        if !plan.tests.contains(&key) {
            tracing::debug!(candidate = %candidate.candidate_key, test_key = %key, "mapped test not in baseline, unmapping");
            candidate.mapped_existing_test_key = None;
        } else if let Some((winner, _)) = claims.get(&key) {
            tracing::debug!(
                candidate = %candidate.candidate_key,
                test_key = %key,
                kept = winner,
                "duplicate mapping demoted to unmapped"
            );
            candidate.mapped_existing_test_key = None;
        } else {
            candidate.mapped_existing_test_key = Some(key.clone());
            claims.insert(key, (idx, Link::Explicit));
        }
    }

    let titled: Vec<(&String, BTreeSet<String>)> = plan
        .test_titles
        .iter()
        .filter(|(k, _)| plan.tests.contains(*k))
        .map(|(k, t)| (k, tokens(t)))
        .collect();

    for (idx, candidate) in candidates.iter_mut().enumerate() {
        if resolved[idx] {
            continue;
        }
        let wanted = tokens(&candidate.title);
        let mut best: Option<(&String, f64)> = None;
        for (test_key, title_tokens) in &titled {
            let score = similarity(&wanted, title_tokens);
            if score >= TITLE_MATCH_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
                best = Some((test_key, score));
            }
        }
        let Some((test_key, score)) = best else {
            continue;
        };
        if claims.contains_key(test_key.as_str()) {
            tracing::debug!(candidate = %candidate.candidate_key, test_key = %test_key, "title match already claimed");
            continue;
        }
        tracing::debug!(candidate = %candidate.candidate_key, test_key = %test_key, score, "title match");
        candidate.mapped_existing_test_key = Some(test_key.to_string());
        claims.insert(test_key.to_string(), (idx, Link::Title));
    }

    let existing_tests_to_skip = claims
        .iter()
        .map(|(test_key, (idx, link))| {
            let candidate = &candidates[*idx];
            let reason = match link {
                Link::Explicit => format!("superseded by AI candidate {}", candidate.candidate_key),
                Link::Title => format!("already covered by AI candidate {}", candidate.candidate_key),
            };
            ExistingTestEntry::computed(test_key.clone(), reason).with_evidence(candidate.title.clone())
        })
        .collect();
    let existing_tests_to_execute = plan
        .tests
        .iter()
        .filter(|t| !claims.contains_key(*t))
        .map(|t| ExistingTestEntry::computed(t.clone(), "baseline"))
        .collect();

    Reconciliation {
        candidate_tests: candidates,
        existing_tests_to_execute,
        existing_tests_to_skip,
    }
}

/// Lenient priority label
#[must_use]
pub fn parse_priority(label: &str) -> Priority {
    match label.trim().to_ascii_uppercase().as_str() {
        "HIGH" | "CRITICAL" | "P1" => Priority::High,
        "LOW" | "P3" => Priority::Low,
        _ => Priority::Medium,
    }
}

/// Lenient test type label
#[must_use]
pub fn parse_test_type(label: &str) -> TestType {
    match label.trim().to_ascii_lowercase().as_str() {
        "regression" => TestType::Regression,
        "security" => TestType::Security,
        "performance" | "perf" => TestType::Performance,
        _ => TestType::Functional,
    }
}

/// Stable key for a suggestion that came without one
#[must_use]
pub fn derive_candidate_key(jira_key: &str, title: &str) -> String {
    let digest = Sha256::digest(format!("{jira_key}|{}", normalize_title(title)).as_bytes());
    format!("cand:{}", &hex::encode(digest)[..8])
}

/// Suggestions that parse out of raw JSON values; the rest are dropped
#[must_use]
pub fn suggestions_from_values(values: &[Value]) -> Vec<TestCaseSuggestion> {
    values
        .iter()
        .enumerate()
        .filter_map(|(idx, value)| match serde_json::from_value::<TestCaseSuggestion>(value.clone()) {
            Ok(s) if !s.title.trim().is_empty() => Some(s),
            Ok(_) => {
                tracing::warn!(idx, "suggestion without title ignored");
                None
            }
            Err(e) => {
                tracing::warn!(idx, error = %e, "malformed suggestion ignored");
                None
            }
        })
        .collect()
}

/// Turn suggestions into candidates with unique keys (first key wins)
#[must_use]
pub fn candidates_from_suggestions(jira_key: &str, suggestions: &[TestCaseSuggestion]) -> Vec<CandidateTest> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(suggestions.len());
    for suggestion in suggestions {
        let key = suggestion
            .candidate_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map_or_else(|| derive_candidate_key(jira_key, &suggestion.title), str::to_string);
        if let Some(first) = seen.get(&key) {
            tracing::warn!(candidate = %key, first, "duplicate candidate key dropped");
            continue;
        }
        seen.insert(key.clone(), out.len());
        out.push(CandidateTest {
            candidate_key: key,
            title: suggestion.title.trim().to_string(),
            priority: parse_priority(&suggestion.priority),
            test_type: parse_test_type(&suggestion.test_type),
            given: suggestion.given.clone(),
            when: suggestion.when.clone(),
            then: suggestion.then.clone(),
            mapped_existing_test_key: suggestion.mapped_existing_test_key.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(tests: &[&str]) -> Plan {
        Plan {
            key: "PLAN-1".into(),
            summary: String::new(),
            jira_keys: vec!["US-1".into()],
            tests: tests.iter().map(|t| (*t).to_string()).collect(),
            test_titles: BTreeMap::new(),
        }
    }

    fn candidate(key: &str, title: &str, mapped: Option<&str>) -> CandidateTest {
        CandidateTest {
            candidate_key: key.into(),
            title: title.into(),
            priority: Priority::Medium,
            test_type: TestType::Functional,
            given: String::new(),
            when: String::new(),
            then: String::new(),
            mapped_existing_test_key: mapped.map(str::to_string),
        }
    }

    fn keys(entries: &[ExistingTestEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.test_key.as_str()).collect()
    }

    #[test]
    fn test_explicit_mapping_partitions_baseline() {
        let out = reconcile(
            &plan(&["T1", "T2"]),
            vec![candidate("C1", "a", Some("T1")), candidate("C2", "b", None)],
        );
        assert_eq!(keys(&out.existing_tests_to_skip), vec!["T1"]);
        assert_eq!(keys(&out.existing_tests_to_execute), vec!["T2"]);
        assert_eq!(out.candidate_tests.len(), 2);
        assert!(out.existing_tests_to_skip[0].reason.contains("C1"));
    }

    #[test]
    fn test_duplicate_mapping_first_wins() {
        let out = reconcile(
            &plan(&["T1"]),
            vec![candidate("C1", "a", Some("T1")), candidate("C2", "b", Some("T1"))],
        );
        assert_eq!(out.existing_tests_to_skip.len(), 1);
        assert_eq!(out.candidate_tests[0].mapped_existing_test_key.as_deref(), Some("T1"));
        assert_eq!(out.candidate_tests[1].mapped_existing_test_key, None);
    }

    #[test]
    fn test_explicit_beats_title_match() {
        let mut p = plan(&["T1", "T2"]);
        p.test_titles.insert("T1".into(), "User logs in with SSO".into());
        let out = reconcile(
            &p,
            vec![
                candidate("C1", "User logs in with SSO", None),
                candidate("C2", "something else", Some("T1")),
            ],
        );
        assert_eq!(out.candidate_tests[1].mapped_existing_test_key.as_deref(), Some("T1"));
        assert_eq!(out.candidate_tests[0].mapped_existing_test_key, None);
        assert!(out.existing_tests_to_skip[0].reason.starts_with("superseded"));
    }

    #[test]
    fn test_title_match_is_normalized() {
        let mut p = plan(&["T1"]);
        p.test_titles.insert("T1".into(), "User logs in - SSO".into());
        let out = reconcile(&p, vec![candidate("C1", "user LOGS in (sso)", None)]);
        assert_eq!(out.candidate_tests[0].mapped_existing_test_key.as_deref(), Some("T1"));
        assert!(out.existing_tests_to_skip[0].reason.starts_with("already covered"));
    }

    #[test]
    fn test_mapping_outside_baseline_is_dropped() {
        let out = reconcile(&plan(&["T1"]), vec![candidate("C1", "a", Some("T9"))]);
        assert!(out.existing_tests_to_skip.is_empty());
        assert_eq!(keys(&out.existing_tests_to_execute), vec!["T1"]);
        assert_eq!(out.candidate_tests[0].mapped_existing_test_key, None);
    }

    #[test]
    fn test_candidates_from_suggestions() {
        let raw = vec![
            serde_json::json!({"title": "Login ok", "priority": "high", "type": "Security"}),
            serde_json::json!({"title": "login  OK!", "priority": "??"}),
            serde_json::json!({"title": "Explicit", "candidate_key": "C9"}),
            serde_json::json!({"nope": true}),
        ];
        let suggestions = suggestions_from_values(&raw);
        assert_eq!(suggestions.len(), 3);
        let candidates = candidates_from_suggestions("US-1", &suggestions);
        // the second suggestion normalizes to the same key as the first
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].candidate_key.starts_with("cand:"));
        assert_eq!(candidates[0].priority, Priority::High);
        assert_eq!(candidates[0].test_type, TestType::Security);
        assert_eq!(candidates[1].candidate_key, "C9");
        assert_eq!(
            derive_candidate_key("US-1", "Login ok"),
            candidates_from_suggestions("US-1", &suggestions)[0].candidate_key
        );
    }
}
