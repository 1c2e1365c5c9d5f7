// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Prometheus metrics for generator calls
//!
//! Counters and histograms go through the `metrics` facade; the Prometheus
//! recorder is installed once per process by [`install`]. Before that the
//! macros are no-ops, so the CLI pays nothing.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Requests by outcome
pub const LLM_REQUESTS: &str = "llm_requests_total";

/// Request latency
pub const LLM_LATENCY: &str = "llm_latency_seconds";

const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Outcome label of `llm_requests_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmOutcome {
    /// Completion received
    Success,
    /// Transport or HTTP failure
    Failure,
    /// Answered by the offline generator
    Mock,
    /// Rejected by the open circuit breaker
    CircuitBreaker,
}

impl LlmOutcome {
    /// Label value
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Mock => "mock",
            Self::CircuitBreaker => "circuit_breaker",
        }
    }
}

/// Install the Prometheus recorder; `None` if another recorder owns the process
pub fn install() -> Option<&'static PrometheusHandle> {
    HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new()
                .set_buckets_for_metric(Matcher::Full(LLM_LATENCY.to_string()), LATENCY_BUCKETS)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "invalid latency buckets, using summaries");
                    PrometheusBuilder::new()
                });
            match builder.install_recorder() {
                Ok(handle) => {
                    metrics::describe_counter!(LLM_REQUESTS, "LLM requests by outcome");
                    metrics::describe_histogram!(LLM_LATENCY, metrics::Unit::Seconds, "LLM request latency");
                    tracing::debug!("prometheus recorder installed");
                    Some(handle)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "metrics recorder not installed");
                    None
                }
            }
        })
        .as_ref()
}

/// Prometheus text exposition of everything recorded so far
#[must_use]
pub fn render() -> String {
    install().map(PrometheusHandle::render).unwrap_or_default()
}

/// Count one generator request
pub fn record_llm_request(outcome: LlmOutcome) {
    metrics::counter!(LLM_REQUESTS, "outcome" => outcome.as_str()).increment(1);
}

/// Observe one generator round trip
pub fn record_llm_latency(elapsed: Duration) {
    metrics::histogram!(LLM_LATENCY).record(elapsed.as_secs_f64());
}
