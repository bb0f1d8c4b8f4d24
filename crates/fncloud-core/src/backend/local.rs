// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process execution backend.
//!
//! "Builds" by mounting the callable's handler under a generated URL and runs
//! invocations on the blocking pool. Counts build requests, which makes it
//! the stub backend for idempotence and concurrency tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::*;
use crate::descriptor::{DeploymentState, FunctionIdentity};
use crate::invocation::{Handler, Invocation, InvocationOutput};

/// A mounted deployment.
#[derive(Debug, Clone)]
struct LocalDeployment {
    identity: FunctionIdentity,
    handler: Option<Handler>,
}

/// In-process backend.
pub struct LocalBackend {
    app_name: String,
    domain: String,
    deployments: Arc<Mutex<HashMap<String, LocalDeployment>>>,
    statuses: Arc<Mutex<HashMap<FunctionIdentity, DeploymentState>>>,
    units: Arc<Mutex<Vec<DeploymentUnit>>>,
    builds: AtomicUsize,
    invocations: AtomicUsize,
    /// Optional delay to simulate build time (in milliseconds)
    pub build_delay_ms: u64,
    /// If true, builds report failure
    pub fail_builds: bool,
    /// If true, builds never finish. Useful for testing timeouts and cancellation.
    pub never_complete: bool,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new("fc_app")
    }
}

impl LocalBackend {
    /// Create a backend that routes under `app_name`.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            domain: "fncloud.local".to_string(),
            deployments: Arc::new(Mutex::new(HashMap::new())),
            statuses: Arc::new(Mutex::new(HashMap::new())),
            units: Arc::new(Mutex::new(Vec::new())),
            builds: AtomicUsize::new(0),
            invocations: AtomicUsize::new(0),
            build_delay_ms: 0,
            fail_builds: false,
            never_complete: false,
        }
    }

    /// Create a backend whose builds fail.
    pub fn failing() -> Self {
        Self {
            fail_builds: true,
            ..Self::default()
        }
    }

    /// Create a backend whose builds never complete.
    pub fn never_completing() -> Self {
        Self {
            never_complete: true,
            ..Self::default()
        }
    }

    pub fn with_build_delay_ms(mut self, delay_ms: u64) -> Self {
        self.build_delay_ms = delay_ms;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Number of build requests received.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Number of invocations served.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Units received so far, in order.
    pub async fn deployed_units(&self) -> Vec<DeploymentUnit> {
        self.units.lock().await.clone()
    }

    /// Overwrite the state reported for `identity`, as if the platform had
    /// torn the deployment down.
    pub async fn set_status(&self, identity: &FunctionIdentity, state: DeploymentState) {
        self.statuses.lock().await.insert(identity.clone(), state);
    }

    fn url_for(&self, unit: &DeploymentUnit) -> String {
        format!("https://{}--{}.{}", self.app_name, unit.route, self.domain)
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn backend_type(&self) -> &'static str {
        "local"
    }

    async fn build_and_deploy(&self, unit: &DeploymentUnit) -> Result<BuildOutcome> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.units.lock().await.push(unit.clone());
        self.statuses
            .lock()
            .await
            .insert(unit.identity.clone(), DeploymentState::Building);

        debug!(
            identity = %unit.identity,
            requirements = unit.dependencies.len(),
            memory = unit.runtime.memory,
            "Local build started"
        );

        if self.never_complete {
            std::future::pending::<()>().await;
        }
        if self.build_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.build_delay_ms)).await;
        }

        let url = self.url_for(unit);
        if self.fail_builds {
            self.statuses
                .lock()
                .await
                .insert(unit.identity.clone(), DeploymentState::Failed);
            return Ok(BuildOutcome {
                url,
                status: BuildStatus::Failed,
                message: Some(format!("simulated build failure for {}", unit.route)),
            });
        }

        self.deployments.lock().await.insert(
            url.clone(),
            LocalDeployment {
                identity: unit.identity.clone(),
                handler: unit.callable.handler.clone(),
            },
        );
        self.statuses
            .lock()
            .await
            .insert(unit.identity.clone(), DeploymentState::Active);

        info!(identity = %unit.identity, url = %url, "Local deployment ready");
        Ok(BuildOutcome {
            url,
            status: BuildStatus::Ready,
            message: None,
        })
    }

    async fn get_status(&self, identity: &FunctionIdentity) -> Result<DeploymentState> {
        Ok(self
            .statuses
            .lock()
            .await
            .get(identity)
            .copied()
            .unwrap_or(DeploymentState::Unconfigured))
    }

    async fn invoke(
        &self,
        url: &str,
        _token: &str,
        invocation: &Invocation,
    ) -> Result<InvocationOutput> {
        let deployment = self
            .deployments
            .lock()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(url.to_string()))?;

        let handler = deployment.handler.ok_or_else(|| {
            BackendError::InvocationFailed(format!(
                "deployment {} has no in-process entry point",
                deployment.identity
            ))
        })?;

        self.invocations.fetch_add(1, Ordering::SeqCst);
        let invocation = invocation.clone();
        tokio::task::spawn_blocking(move || handler.call(invocation))
            .await
            .map_err(|e| BackendError::InvocationFailed(e.to_string()))?
            .map_err(|e| BackendError::InvocationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::dependency::DependencySet;
    use crate::descriptor::{FunctionDescriptor, FunctionSpec};
    use serde_json::json;

    fn unit(handler: Option<Handler>) -> DeploymentUnit {
        let spec = FunctionSpec::new("demo", "double", "fn double(x: i64) -> i64 { x * 2 }");
        let descriptor = FunctionDescriptor::from_spec(&spec);
        let runtime = descriptor.config.resolve(&Settings::default());
        DeploymentUnit::new(&descriptor, DependencySet::new(), runtime, handler)
    }

    fn double_handler() -> Handler {
        Handler::new(|inv| {
            let x: i64 = inv.arg("x")?;
            InvocationOutput::value(&(x * 2))
        })
    }

    #[tokio::test]
    async fn test_build_then_invoke() {
        let backend = LocalBackend::default();
        let unit = unit(Some(double_handler()));

        let outcome = backend.build_and_deploy(&unit).await.unwrap();
        assert_eq!(outcome.status, BuildStatus::Ready);
        assert_eq!(
            outcome.url,
            format!("https://fc_app--demo-double-{}.fncloud.local", unit.identity)
        );
        assert_eq!(
            backend.get_status(&unit.identity).await.unwrap(),
            DeploymentState::Active
        );

        let mut args = serde_json::Map::new();
        args.insert("x".to_string(), json!(21));
        let output = backend
            .invoke(&outcome.url, "token", &Invocation::new(args))
            .await
            .unwrap();
        assert_eq!(output.result, json!(42));
        assert_eq!(backend.build_count(), 1);
        assert_eq!(backend.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_backend_reports_failed_status() {
        let backend = LocalBackend::failing();
        let unit = unit(None);

        let outcome = backend.build_and_deploy(&unit).await.unwrap();
        assert_eq!(outcome.status, BuildStatus::Failed);
        assert!(outcome.message.unwrap().contains("simulated build failure"));
        assert_eq!(
            backend.get_status(&unit.identity).await.unwrap(),
            DeploymentState::Failed
        );
    }

    #[tokio::test]
    async fn test_invoke_unknown_url() {
        let backend = LocalBackend::default();
        let result = backend
            .invoke("https://nowhere", "token", &Invocation::default())
            .await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_handler_errors_surface() {
        let backend = LocalBackend::default();
        let unit = unit(Some(double_handler()));
        let outcome = backend.build_and_deploy(&unit).await.unwrap();

        let result = backend
            .invoke(&outcome.url, "token", &Invocation::default())
            .await;
        match result {
            Err(BackendError::InvocationFailed(message)) => {
                assert!(message.contains("missing argument `x`"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
