// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Test-plan generation: prompt assembly, LLM providers, output splitting

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::{LlmConfig, LlmProvider};
use crate::error::{PlanError, PlanResult};
use crate::telemetry::{self, LlmOutcome};
use crate::upstream::{CodeChange, JiraIssue, XrayTest};

const MARKDOWN_MARKER: &str = "---MARKDOWN---";
const SUGGESTIONS_MARKER: &str = "---SUGGESTIONS_JSON---";

/// Logical id of the generation prompt, used by the prompt archive
pub const PROMPT_ID: &str = "test-plan/prompt";

/// Default logical id of the suggestion schema
pub const SCHEMA_ID: &str = "test-plan/suggestions";

/// System prompt pinning the two-part output format
pub const SYSTEM_PROMPT: &str = r#"You are a senior QA engineer.

Produce TWO outputs:

1) A detailed test plan in Markdown.
2) A list of NEW test case suggestions in JSON.

Rules:
- Follow the format below exactly.
- The JSON must be a valid array matching:

[
  {
    "title": string,
    "priority": "HIGH" | "MEDIUM" | "LOW",
    "type": "functional" | "regression" | "security" | "performance",
    "given": string,
    "when": string,
    "then": string,
    "mapped_existing_test_key": string | null
  }
]

FORMAT:

---MARKDOWN---
<markdown content>

---SUGGESTIONS_JSON---
<json array>"#;

/// One suggestion as emitted by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseSuggestion {
    /// Title
    pub title: String,
    /// Priority label, normalized when reconciled
    #[serde(default)]
    pub priority: String,
    /// Type label, normalized when reconciled
    #[serde(rename = "type", default)]
    pub test_type: String,
    /// Gherkin "given"
    #[serde(default)]
    pub given: String,
    /// Gherkin "when"
    #[serde(default)]
    pub when: String,
    /// Gherkin "then"
    #[serde(default)]
    pub then: String,
    /// Existing test the suggestion replaces or covers
    #[serde(default)]
    pub mapped_existing_test_key: Option<String>,
    /// Stable key, when the producer already assigned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_key: Option<String>,
}

/// Result of one generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlanResponse {
    /// Jira key
    pub jira_key: String,
    /// Markdown plan
    pub markdown: String,
    /// Parsed suggestions
    pub suggestions: Vec<TestCaseSuggestion>,
    /// Issue, tests and changes the generator saw
    pub raw_context: Value,
    /// Provider label
    pub provider: String,
    /// Model label
    pub model: String,
}

/// Render the user prompt for an issue
#[must_use]
pub fn build_prompt(issue: &JiraIssue, tests: &[XrayTest], changes: &[CodeChange]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "JIRA ISSUE\n----------");
    let _ = writeln!(out, "Key: {}", issue.key);
    let _ = writeln!(out, "Summary: {}", issue.summary);
    let _ = writeln!(out, "Description:\n{}\n", issue.description);
    let _ = writeln!(
        out,
        "Acceptance Criteria:\n{}\n",
        issue.acceptance_criteria.as_deref().unwrap_or("(none)")
    );

    let _ = writeln!(out, "EXISTING XRAY TESTS\n-------------------");
    if tests.is_empty() {
        let _ = writeln!(out, "(none)");
    }
    for test in tests {
        let _ = writeln!(out, "- {}: {}", test.key, test.summary);
    }

    let _ = writeln!(out, "\nCODE CHANGES\n------------");
    if changes.is_empty() {
        let _ = writeln!(out, "(none)");
    }
    for change in changes {
        let _ = writeln!(out, "- {}", change.file_path);
    }

    out.push_str(
        "\nInstructions:\n\
         - Reuse existing tests where relevant.\n\
         - Propose NEW test cases only in the JSON suggestions.\n\
         - Be precise and actionable.",
    );
    out
}

/// System and user prompt joined the way the prompt archive hashes them
#[must_use]
pub fn combined_prompt(system: &str, user: &str) -> String {
    format!("{system}\n\n---\n\n{user}")
}

/// Split raw model output into markdown and suggestions.
///
/// Output missing either marker is returned whole as markdown. Items that do
/// not parse as a suggestion are dropped one by one.
#[must_use]
pub fn split_output(content: &str) -> (String, Vec<TestCaseSuggestion>) {
    let (Some(md_at), Some(json_at)) = (content.find(MARKDOWN_MARKER), content.find(SUGGESTIONS_MARKER)) else {
        tracing::warn!("model output does not follow the markdown/suggestions format");
        return (content.to_string(), Vec::new());
    };
    let md_start = md_at + MARKDOWN_MARKER.len();
    let markdown = if md_start <= json_at {
        content[md_start..json_at].trim().to_string()
    } else {
        content[md_start..].trim().to_string()
    };
    let json_part = content[json_at + SUGGESTIONS_MARKER.len()..].trim();
    let json_part = json_part
        .strip_prefix("```json")
        .or_else(|| json_part.strip_prefix("```"))
        .map_or(json_part, |s| s.trim_end().trim_end_matches("```").trim());

    let items = match serde_json::from_str::<Value>(json_part) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            tracing::warn!("suggestions block is not a JSON array");
            return (markdown, Vec::new());
        }
        Err(e) => {
            tracing::warn!(error = %e, "suggestions block is not valid JSON");
            return (markdown, Vec::new());
        }
    };

    let mut suggestions = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<TestCaseSuggestion>(item) {
            Ok(s) if !s.title.trim().is_empty() => suggestions.push(s),
            Ok(_) => tracing::warn!(idx, "dropping suggestion without title"),
            Err(e) => tracing::warn!(idx, error = %e, "dropping malformed suggestion"),
        }
    }
    (markdown, suggestions)
}

/// Chat-style text generator
#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider label
    fn provider(&self) -> &str;

    /// Model label
    fn model(&self) -> &str;

    /// Complete one system + user exchange
    async fn chat(&self, system: &str, user: &str) -> PlanResult<String>;
}

/// Deterministic offline generator
#[derive(Debug, Clone, Default)]
pub struct MockGenerator;

#[async_trait]
impl Generator for MockGenerator {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock"
    }

    async fn chat(&self, _system: &str, user: &str) -> PlanResult<String> {
        telemetry::record_llm_request(LlmOutcome::Mock);
        let field = |name: &str| {
            user.lines()
                .find_map(|l| l.strip_prefix(name))
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };
        let key = field("Key:");
        let summary = field("Summary:");
        let excerpt: String = user.chars().take(200).collect();
        let suggestions = json!([
            {
                "title": format!("{summary} - nominal flow"),
                "priority": "HIGH",
                "type": "functional",
                "given": format!("the feature of {key} is deployed"),
                "when": "the user performs the nominal flow",
                "then": "the expected outcome is observed",
                "mapped_existing_test_key": null
            },
            {
                "title": format!("{summary} - invalid input is rejected"),
                "priority": "MEDIUM",
                "type": "regression",
                "given": format!("the feature of {key} is deployed"),
                "when": "the user submits invalid input",
                "then": "a validation error is shown",
                "mapped_existing_test_key": null
            }
        ]);
        Ok(format!(
            "{MARKDOWN_MARKER}\n## Mock Test Plan\n- Objective: demonstrate prompt impact\n\
             - Scope: Jira issue, existing tests and code changes\n\n### Extract\n{excerpt}\n\n\
             {SUGGESTIONS_MARKER}\n{suggestions:#}"
        ))
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<Instant>,
}

/// Fails calls fast after repeated transport failures.
///
/// Opens once `threshold` consecutive failures are recorded and rejects
/// calls until `open_for` has passed; the next call is then let through and
/// a single failure opens it again. A success closes it.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    open_for: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Breaker opening after `threshold` failures; zero disables it
    #[must_use]
    pub fn new(threshold: u32, open_for: Duration) -> Self {
        Self {
            threshold,
            open_for,
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether calls are currently rejected
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().open_until.is_some_and(|until| Instant::now() < until)
    }

    fn record_failure(&self) {
        let mut state = self.state();
        state.failure_count = state.failure_count.saturating_add(1);
        if self.threshold > 0 && state.failure_count >= self.threshold {
            tracing::warn!(
                failures = state.failure_count,
                open_ms = self.open_for.as_millis() as u64,
                "llm circuit breaker opened"
            );
            state.open_until = Some(Instant::now() + self.open_for);
        }
    }

    fn reset(&self) {
        let mut state = self.state();
        if state.failure_count > 0 {
            tracing::info!("llm circuit breaker closed");
        }
        state.failure_count = 0;
        state.open_until = None;
    }
}

/// Failure of one chat attempt
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Transport(reqwest::Error),
    #[error("HTTP {0}: {1}")]
    Status(reqwest::StatusCode, String),
    #[error("circuit breaker open")]
    BreakerOpen,
}

impl AttemptError {
    /// Connection, timeout and protocol failures are worth another try
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            Self::Status(..) | Self::BreakerOpen => false,
        }
    }
}

/// OpenAI-compatible chat completions client
#[derive(Debug, Clone)]
pub struct ChatGenerator {
    client: reqwest::Client,
    provider: String,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    backoff: ExponentialBuilder,
    breaker: Arc<CircuitBreaker>,
}

impl ChatGenerator {
    /// Client for the configured endpoint
    pub fn new(cfg: &LlmConfig) -> PlanResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .map_err(|e| PlanError::unavailable("llm", e))?;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(cfg.retry_min_ms))
            .with_max_delay(Duration::from_millis(cfg.retry_max_ms))
            .with_factor(2.0)
            .with_max_times(cfg.max_attempts.saturating_sub(1));
        Ok(Self {
            client,
            provider: match cfg.provider {
                LlmProvider::Mock => "mock",
                LlmProvider::Openai => "openai",
                LlmProvider::Internal => "internal",
            }
            .to_string(),
            model: cfg.model.clone(),
            endpoint: cfg.endpoint(),
            api_key: cfg.api_key.clone().filter(|k| !k.is_empty()),
            timeout: cfg.timeout(),
            backoff,
            breaker: Arc::new(CircuitBreaker::new(
                cfg.breaker_failures,
                Duration::from_millis(cfg.breaker_open_ms),
            )),
        })
    }

    /// Breaker guarding this client
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn send(&self, payload: &Value) -> Result<Value, AttemptError> {
        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(AttemptError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AttemptError::Status(status, text));
        }
        response.json::<Value>().await.map_err(AttemptError::Transport)
    }

    /// One request behind the breaker; HTTP status errors do not trip it
    async fn attempt(&self, payload: &Value) -> Result<Value, AttemptError> {
        if self.breaker.is_open() {
            telemetry::record_llm_request(LlmOutcome::CircuitBreaker);
            return Err(AttemptError::BreakerOpen);
        }
        let started = Instant::now();
        let result = self.send(payload).await;
        telemetry::record_llm_latency(started.elapsed());
        match &result {
            Ok(_) => {
                self.breaker.reset();
                telemetry::record_llm_request(LlmOutcome::Success);
            }
            Err(AttemptError::Status(..)) => telemetry::record_llm_request(LlmOutcome::Failure),
            Err(_) => {
                self.breaker.record_failure();
                telemetry::record_llm_request(LlmOutcome::Failure);
            }
        }
        result
    }

    fn into_plan_error(&self, err: AttemptError) -> PlanError {
        match err {
            AttemptError::Transport(e) if e.is_timeout() => PlanError::DependencyTimeout {
                dependency: "llm",
                budget: self.timeout,
            },
            AttemptError::Transport(e) => PlanError::unavailable("llm", e),
            AttemptError::Status(status, text) => PlanError::unavailable("llm", format!("HTTP {status}: {text}")),
            AttemptError::BreakerOpen => {
                PlanError::unavailable("llm", "service temporarily unavailable (circuit breaker open)")
            }
        }
    }
}

#[async_trait]
impl Generator for ChatGenerator {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, system: &str, user: &str) -> PlanResult<String> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        tracing::debug!(provider = %self.provider, endpoint = %self.endpoint, "llm request");

        let body = (|| self.attempt(&payload))
            .retry(self.backoff)
            .when(AttemptError::is_retryable)
            .notify(|err, delay| {
                tracing::warn!(
                    provider = %self.provider,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "llm attempt failed, retrying"
                );
            })
            .await
            .map_err(|e| self.into_plan_error(e))?;

        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PlanError::unavailable("llm", "malformed chat completion response"))
    }
}

/// Generator for the configured provider
pub fn from_config(cfg: &LlmConfig) -> PlanResult<Arc<dyn Generator>> {
    Ok(match cfg.provider {
        LlmProvider::Mock => Arc::new(MockGenerator),
        LlmProvider::Openai | LlmProvider::Internal => Arc::new(ChatGenerator::new(cfg)?),
    })
}

/// Generate a test plan for an issue
pub async fn generate_test_plan(
    generator: &dyn Generator,
    issue: &JiraIssue,
    tests: &[XrayTest],
    changes: &[CodeChange],
) -> PlanResult<TestPlanResponse> {
    let prompt = build_prompt(issue, tests, changes);
    let content = generator.chat(SYSTEM_PROMPT, &prompt).await?;
    let (markdown, suggestions) = split_output(&content);
    tracing::info!(
        jira_key = %issue.key,
        provider = generator.provider(),
        suggestions = suggestions.len(),
        "test plan generated"
    );
    Ok(TestPlanResponse {
        jira_key: issue.key.clone(),
        markdown,
        suggestions,
        raw_context: json!({ "issue": issue, "tests": tests, "changes": changes }),
        provider: generator.provider().to_string(),
        model: generator.model().to_string(),
    })
}
