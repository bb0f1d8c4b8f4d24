// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fncloud-core.
//!
//! Every variant carries owned strings only so that a failure captured by the
//! deployment manager can be handed to every caller waiting on the same
//! function.

use std::time::Duration;

use thiserror::Error;

use crate::registry::TokenScope;

/// Errors surfaced by the URL-retrieval and remote-invocation paths.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Static or fallback dependency analysis failed, or stayed ambiguous
    /// with no safe default.
    #[error("dependency resolution failed: {0}")]
    Resolution(String),

    /// The external language-model service could not be reached.
    #[error("dependency analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    /// The language-model service answered with unparseable or unsafe content.
    #[error("dependency analysis returned invalid content: {0}")]
    AnalysisInvalid(String),

    /// The backend rejected or failed the build. The cause is kept verbatim.
    #[error("deployment of {identity} failed: {cause}")]
    DeploymentFailed {
        /// Identity of the function whose deployment failed.
        identity: String,
        /// Cause reported by the backend.
        cause: String,
    },

    /// The function source changed since its last successful deployment.
    #[error("function {function} changed since its last deployment; redeploy required")]
    Stale {
        /// Qualified name of the function.
        function: String,
    },

    /// The function has no active deployment.
    #[error("function {0} is not deployed")]
    NotDeployed(String),

    /// Instance state could not be captured or restored.
    #[error("instance state is not serializable: {0}")]
    NotSerializable(String),

    /// The token is unknown, superseded or revoked.
    #[error("token not found")]
    TokenNotFound,

    /// The token expired.
    #[error("token expired")]
    TokenExpired,

    /// The token does not carry the scope the operation requires.
    #[error("insufficient token scope: {required} required, {actual} presented")]
    InsufficientScope {
        /// Scope the operation requires.
        required: TokenScope,
        /// Scope of the presented token.
        actual: TokenScope,
    },

    /// A network boundary exceeded its deadline.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The remote invocation failed after the function was deployed.
    #[error("remote invocation failed: {0}")]
    Invocation(String),
}

impl Error {
    /// Build a [`Error::Timeout`] for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Short stable code, used in logs and by the dashboard.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Resolution(_) => "RESOLUTION_ERROR",
            Self::AnalysisUnavailable(_) => "ANALYSIS_UNAVAILABLE",
            Self::AnalysisInvalid(_) => "ANALYSIS_INVALID",
            Self::DeploymentFailed { .. } => "DEPLOYMENT_FAILED",
            Self::Stale { .. } => "STALE",
            Self::NotDeployed(_) => "NOT_DEPLOYED",
            Self::NotSerializable(_) => "NOT_SERIALIZABLE",
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::InsufficientScope { .. } => "INSUFFICIENT_SCOPE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Invocation(_) => "INVOCATION_FAILED",
        }
    }

    /// Whether this is a token error. Token errors always deny.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::TokenNotFound | Self::TokenExpired | Self::InsufficientScope { .. }
        )
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type using the fncloud [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout("backend build", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "backend build timed out after 1500ms");
        assert_eq!(err.error_code(), "TIMEOUT");
    }

    #[test]
    fn test_scope_display() {
        let err = Error::InsufficientScope {
            required: TokenScope::Deploy,
            actual: TokenScope::Invoke,
        };
        assert!(err.to_string().contains("deploy required"));
        assert!(err.to_string().contains("invoke presented"));
        assert!(err.is_auth_error());
    }

    #[test]
    fn test_deployment_failed_keeps_cause_verbatim() {
        let err = Error::DeploymentFailed {
            identity: "abc123".to_string(),
            cause: "image build exited with code 2: missing libssl".to_string(),
        };
        assert!(
            err.to_string()
                .ends_with("image build exited with code 2: missing libssl")
        );
        assert!(!err.is_auth_error());
    }

    #[test]
    fn test_errors_are_cloneable_for_waiters() {
        let err = Error::Cancelled;
        let replay = err.clone();
        assert_eq!(err, replay);
    }
}
