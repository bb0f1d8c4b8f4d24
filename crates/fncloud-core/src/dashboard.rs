// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only queries used by the web dashboard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::descriptor::{DeploymentState, FunctionIdentity, FunctionKey};
use crate::registry::{Registry, TokenScope};

/// Result of a token check. Invalid tokens are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenValidation {
    pub valid: bool,
    pub scope: Option<TokenScope>,
    pub owner: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Error code when invalid (`TOKEN_NOT_FOUND`, `TOKEN_EXPIRED`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// One row of the deployment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSummary {
    pub identity: FunctionIdentity,
    pub function: FunctionKey,
    pub url: String,
    pub state: DeploymentState,
    pub last_deployed: DateTime<Utc>,
}

/// Dashboard view over the registry.
#[derive(Clone)]
pub struct Dashboard {
    registry: Arc<Registry>,
}

impl Dashboard {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub async fn validate_token(&self, secret: &str) -> TokenValidation {
        match self.registry.validate(secret).await {
            Ok(grant) => TokenValidation {
                valid: true,
                scope: Some(grant.scope),
                owner: Some(grant.owner),
                expires_at: grant.expires_at,
                reason: None,
            },
            Err(err) => {
                debug!(error = %err, "Dashboard token rejected");
                TokenValidation {
                    valid: false,
                    scope: None,
                    owner: None,
                    expires_at: None,
                    reason: Some(err.error_code()),
                }
            }
        }
    }

    /// Deployments created with `owner`'s tokens, most recent first.
    pub async fn list_deployments(&self, owner: &str) -> Vec<DeploymentSummary> {
        self.registry
            .list(owner)
            .await
            .into_iter()
            .map(|endpoint| DeploymentSummary {
                identity: endpoint.identity,
                function: endpoint.function,
                url: endpoint.url,
                state: endpoint.state,
                last_deployed: endpoint.last_deployed,
            })
            .collect()
    }
}
