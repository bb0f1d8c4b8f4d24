// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP execution backend.
//!
//! Talks JSON to a remote execution service:
//!
//! - `POST {base}/v1/deployments` with a [`DeploymentUnit`] → [`BuildOutcome`]
//! - `GET {base}/v1/deployments/{identity}` → `{"state": "..."}`
//! - `POST {url}` with an [`Invocation`] → [`InvocationOutput`]

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::*;
use crate::config::Settings;
use crate::descriptor::{DeploymentState, FunctionIdentity};
use crate::invocation::{Invocation, InvocationOutput};

/// Backend reached over HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    state: DeploymentState,
}

impl HttpBackend {
    /// Create a backend client. `token` is the backend credential.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Create a backend client using the credential and timeout from settings.
    pub fn from_settings(base_url: impl Into<String>, settings: &Settings) -> Result<Self> {
        Self::new(base_url, settings.token.clone(), settings.backend_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

/// Map a non-success response onto a backend error.
async fn error_for(response: reqwest::Response, subject: &str) -> BackendError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => BackendError::Unauthorized(format!("{}: {}", status, body)),
        404 => BackendError::NotFound(subject.to_string()),
        _ => BackendError::Transport(format!("backend error {}: {}", status, body)),
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    fn backend_type(&self) -> &'static str {
        "http"
    }

    async fn build_and_deploy(&self, unit: &DeploymentUnit) -> Result<BuildOutcome> {
        debug!(identity = %unit.identity, route = %unit.route, "Requesting remote build");

        let response = self
            .authorized(
                self.client
                    .post(format!("{}/v1/deployments", self.base_url))
                    .json(unit),
            )
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_client_error() && !matches!(status.as_u16(), 401 | 403 | 404) {
            // Rejected unit; the body is the cause
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::BuildFailed(body));
        }
        if !status.is_success() {
            return Err(error_for(response, unit.identity.as_str()).await);
        }

        let outcome: BuildOutcome = response.json().await.map_err(transport)?;
        info!(identity = %unit.identity, url = %outcome.url, status = ?outcome.status, "Remote build finished");
        Ok(outcome)
    }

    async fn get_status(&self, identity: &FunctionIdentity) -> Result<DeploymentState> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/v1/deployments/{}", self.base_url, identity)),
            )
            .send()
            .await
            .map_err(transport)?;

        if response.status().as_u16() == 404 {
            return Ok(DeploymentState::Unconfigured);
        }
        if !response.status().is_success() {
            return Err(error_for(response, identity.as_str()).await);
        }

        let status: StatusResponse = response.json().await.map_err(transport)?;
        Ok(status.state)
    }

    async fn invoke(
        &self,
        url: &str,
        token: &str,
        invocation: &Invocation,
    ) -> Result<InvocationOutput> {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(invocation)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::InvocationFailed(body));
        }
        if !status.is_success() {
            return Err(error_for(response, url).await);
        }

        let bytes = response.bytes().await.map_err(transport)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
