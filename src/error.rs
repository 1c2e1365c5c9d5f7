// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Error taxonomy shared by the library, the HTTP server and the CLI

use crate::types::OverlayKind;
use std::time::Duration;

/// Errors raised by plan, overlay and upstream operations
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Unknown plan, overlay or candidate
    #[error("{what} not found: {key}")]
    NotFound {
        /// What was looked up ("plan", "overlay", "candidate", ...)
        what: &'static str,
        /// The key that did not resolve
        key: String,
    },

    /// Overlay name already bound to another kind
    #[error("overlay '{name}' is bound to kind '{existing}', cannot write a '{requested}' payload")]
    KindConflict {
        /// Overlay name
        name: String,
        /// Kind the name was first created with
        existing: OverlayKind,
        /// Kind of the rejected write
        requested: OverlayKind,
    },

    /// Operation attempted against the wrong overlay kind
    #[error("overlay '{name}' is a '{actual}' overlay, expected '{expected}'")]
    OverlayKind {
        /// Overlay name
        name: String,
        /// Kind required by the operation
        expected: OverlayKind,
        /// Kind found in the store
        actual: OverlayKind,
    },

    /// Decision value outside PENDING/ACCEPTED/REJECTED
    #[error("invalid decision '{0}', expected PENDING, ACCEPTED or REJECTED")]
    InvalidDecision(String),

    /// Upstream (Jira, Xray, Bitbucket, LLM) exceeded its time budget
    #[error("{dependency} did not answer within {budget:?}")]
    DependencyTimeout {
        /// Upstream name
        dependency: &'static str,
        /// Budget that was exceeded
        budget: Duration,
    },

    /// Upstream unreachable or returned garbage
    #[error("{dependency} unavailable: {reason}")]
    DependencyUnavailable {
        /// Upstream name
        dependency: &'static str,
        /// Underlying failure
        reason: String,
    },

    /// Overlay lock could not be acquired within the configured wait
    #[error("overlay '{name}' for plan '{plan_key}' is busy, retry later")]
    Busy {
        /// Plan key
        plan_key: String,
        /// Overlay name
        name: String,
    },

    /// Malformed request input (unsafe key, bad body)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Reading or writing a stored document failed
    #[error("storage error: {0}")]
    Storage(String),
}

impl PlanError {
    /// Shorthand for [`PlanError::NotFound`]
    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            key: key.into(),
        }
    }

    /// Shorthand for [`PlanError::DependencyUnavailable`]
    pub fn unavailable(dependency: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::DependencyUnavailable {
            dependency,
            reason: reason.to_string(),
        }
    }

    /// Taxonomy name surfaced to clients
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFoundError",
            Self::KindConflict { .. } => "KindConflictError",
            Self::OverlayKind { .. } => "OverlayKindError",
            Self::InvalidDecision(_) => "InvalidDecisionError",
            Self::DependencyTimeout { .. } => "DependencyTimeoutError",
            Self::DependencyUnavailable { .. } => "DependencyUnavailableError",
            Self::Busy { .. } => "OverlayBusyError",
            Self::InvalidInput(_) => "InvalidInputError",
            Self::Storage(_) => "StorageError",
        }
    }

    /// HTTP status code for this error
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::KindConflict { .. } | Self::OverlayKind { .. } => 409,
            Self::InvalidDecision(_) => 422,
            Self::InvalidInput(_) => 400,
            Self::DependencyTimeout { .. } => 504,
            Self::DependencyUnavailable { .. } => 502,
            Self::Busy { .. } => 503,
            Self::Storage(_) => 500,
        }
    }
}

impl From<std::io::Error> for PlanError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result alias for library operations
pub type PlanResult<T> = std::result::Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status_mapping() {
        let err = PlanError::not_found("plan", "TP-404");
        assert_eq!(err.kind(), "NotFoundError");
        assert_eq!(err.status(), 404);
        assert_eq!(err.to_string(), "plan not found: TP-404");

        let err = PlanError::KindConflict {
            name: "promptA".into(),
            existing: OverlayKind::Run,
            requested: OverlayKind::File,
        };
        assert_eq!(err.kind(), "KindConflictError");
        assert_eq!(err.status(), 409);

        let err = PlanError::DependencyTimeout {
            dependency: "llm",
            budget: Duration::from_millis(10),
        };
        assert_eq!(err.status(), 504);
        assert_ne!(err.status(), PlanError::unavailable("llm", "refused").status());
    }
}
