// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Configuration management
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML
//! file, then `QAPLAN_*` environment variables (`__` separates nested keys,
//! e.g. `QAPLAN_LLM__PROVIDER=openai`).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// LLM provider switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Deterministic output, no network
    #[default]
    Mock,
    /// OpenAI chat completions
    Openai,
    /// Internal OpenAI-compatible gateway
    Internal,
}

/// LLM client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider
    pub provider: LlmProvider,
    /// Model label sent to the gateway
    pub model: String,
    /// Base URL (e.g. `https://api.openai.com/v1`)
    pub base_url: String,
    /// Path appended to the base URL; empty when `base_url` is the endpoint
    pub chat_path: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Per-request budget in milliseconds
    pub timeout_ms: u64,
    /// Attempts per call, first try included
    pub max_attempts: usize,
    /// First backoff delay in milliseconds
    pub retry_min_ms: u64,
    /// Backoff ceiling in milliseconds
    pub retry_max_ms: u64,
    /// Consecutive transport failures that open the circuit breaker
    pub breaker_failures: u32,
    /// How long an open breaker rejects calls, in milliseconds
    pub breaker_open_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Mock,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            chat_path: "/chat/completions".to_string(),
            api_key: None,
            timeout_ms: 30_000,
            max_attempts: 3,
            retry_min_ms: 1_000,
            retry_max_ms: 8_000,
            breaker_failures: 5,
            breaker_open_ms: 30_000,
        }
    }
}

impl LlmConfig {
    /// Full chat endpoint URL
    #[must_use]
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.chat_path.trim();
        if path.is_empty() {
            base.to_string()
        } else if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Request budget
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for overlays, run documents and the prompt archive
    pub data_dir: PathBuf,
    /// Directory holding Jira/Xray/Bitbucket snapshots (defaults to `<data_dir>/mocks`)
    pub upstream_dir: Option<PathBuf>,
    /// HTTP listen address
    pub bind: String,
    /// Budget for one upstream call, in milliseconds
    pub upstream_timeout_ms: u64,
    /// Maximum wait for an overlay lock, in milliseconds
    pub lock_wait_ms: u64,
    /// LLM settings
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: directories::ProjectDirs::from("com", "hyperpolymath", "qaplan")
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".qaplan")),
            upstream_dir: None,
            bind: "127.0.0.1:8000".to_string(),
            upstream_timeout_ms: 5_000,
            lock_wait_ms: 2_000,
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Directory of upstream snapshots
    #[must_use]
    pub fn upstream_dir(&self) -> PathBuf {
        self.upstream_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("mocks"))
    }

    /// Upstream call budget
    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Overlay lock wait
    #[must_use]
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    /// Check provider requirements
    pub fn validate(&self) -> Result<()> {
        match self.llm.provider {
            LlmProvider::Mock => {}
            LlmProvider::Openai => {
                if self.llm.api_key.as_deref().unwrap_or("").is_empty() {
                    bail!("llm.api_key is empty (llm.provider=openai)");
                }
                if self.llm.base_url.trim().is_empty() {
                    bail!("llm.base_url is empty (llm.provider=openai)");
                }
            }
            LlmProvider::Internal => {
                if self.llm.base_url.trim().is_empty() {
                    bail!("llm.base_url is empty (llm.provider=internal)");
                }
            }
        }
        if self.lock_wait_ms == 0 {
            bail!("lock_wait_ms must be greater than zero");
        }
        if self.llm.max_attempts == 0 {
            bail!("llm.max_attempts must be at least 1");
        }
        if self.llm.retry_min_ms > self.llm.retry_max_ms {
            bail!("llm.retry_min_ms must not exceed llm.retry_max_ms");
        }
        Ok(())
    }

    /// Copy with secrets masked
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        if out.llm.api_key.is_some() {
            out.llm.api_key = Some("***".to_string());
        }
        out
    }

    /// Secret-free diagnostics
    #[must_use]
    pub fn diagnostics(&self) -> serde_json::Value {
        serde_json::json!({
            "data_dir": self.data_dir,
            "upstream_dir": self.upstream_dir(),
            "bind": self.bind,
            "upstream_timeout_ms": self.upstream_timeout_ms,
            "lock_wait_ms": self.lock_wait_ms,
            "llm_provider": self.llm.provider,
            "llm_model": self.llm.model,
            "llm_timeout_ms": self.llm.timeout_ms,
            "llm_max_attempts": self.llm.max_attempts,
            "llm_breaker_failures": self.llm.breaker_failures,
            "llm_endpoint": match self.llm.provider {
                LlmProvider::Mock => None,
                _ => Some(self.llm.endpoint()),
            },
            "has_llm_key": self.llm.api_key.as_deref().is_some_and(|k| !k.is_empty()),
        })
    }
}

/// Load configuration from defaults, an optional file and the environment
pub fn load(file: Option<&Path>) -> Result<Config> {
    let defaults = config::Config::try_from(&Config::default())
        .context("Failed to build default configuration")?;

    let mut builder = config::Config::builder().add_source(defaults);
    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("QAPLAN")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: Config = builder
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;
    cfg.validate()?;
    Ok(cfg)
}
