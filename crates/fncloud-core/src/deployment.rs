// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment Manager
//!
//! Turns a descriptor into a live endpoint:
//!
//! ```text
//! Unconfigured → Resolving → Building → Active
//!                    │           │         │
//!                    └───────────┴──→ Failed   Active → Stale (identity changed)
//! ```
//!
//! One slot exists per function key. Callers for the same key serialize on
//! the slot's mutex, so the second caller waits and then sees the first
//! caller's outcome (the cached endpoint, or the recorded failure). Distinct
//! functions deploy in parallel. `Failed` is sticky until [`DeploymentManager::redeploy`].
//!
//! Reading the endpoint or the state of an active deployment asks the backend
//! first; a deployment the backend no longer reports as active is `Failed`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{BuildStatus, DeploymentUnit, ExecutionBackend};
use crate::config::Settings;
use crate::dependency::{DependencyResolver, DependencySet, Resolution};
use crate::descriptor::{DeploymentState, FunctionDescriptor, FunctionIdentity, FunctionKey};
use crate::error::{Error, Result};
use crate::invocation::Handler;
use crate::llm::FallbackAnalyzer;
use crate::registry::{Registry, RemoteEndpoint, TokenGrant, TokenScope};

/// Deployment bookkeeping for one function key.
#[derive(Debug, Default)]
struct Slot {
    state: DeploymentState,
    /// Identity of the most recent cycle
    identity: Option<FunctionIdentity>,
    dependencies: Option<DependencySet>,
    endpoint: Option<RemoteEndpoint>,
    failure: Option<Error>,
}

impl Slot {
    fn fail(&mut self, err: Error) -> Error {
        self.state = DeploymentState::Failed;
        self.failure = Some(err.clone());
        err
    }
}

/// What the manager knows about one function.
#[derive(Debug, Clone)]
pub struct DeploymentInfo {
    pub state: DeploymentState,
    pub identity: Option<FunctionIdentity>,
    pub dependencies: Option<DependencySet>,
    pub endpoint: Option<RemoteEndpoint>,
    pub failure: Option<Error>,
}

/// Deployment manager.
pub struct DeploymentManager {
    settings: Arc<Settings>,
    registry: Arc<Registry>,
    resolver: DependencyResolver,
    analyzer: Option<FallbackAnalyzer>,
    backend: Arc<dyn ExecutionBackend>,
    slots: RwLock<HashMap<FunctionKey, Arc<Mutex<Slot>>>>,
}

impl DeploymentManager {
    pub fn new(
        settings: Arc<Settings>,
        registry: Arc<Registry>,
        resolver: DependencyResolver,
        analyzer: Option<FallbackAnalyzer>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> Self {
        Self {
            settings,
            registry,
            resolver,
            analyzer,
            backend,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    async fn slot(&self, key: &FunctionKey) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.read().await.get(key) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().await.entry(key.clone()).or_default())
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Make sure `descriptor` is deployed and return its endpoint.
    ///
    /// Idempotent for an unchanged identity: once `Active`, no backend call is
    /// made. A recorded failure for the same identity is returned as-is.
    pub async fn ensure_deployed(
        &self,
        descriptor: &FunctionDescriptor,
        handler: Option<Handler>,
        deploy_token: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<RemoteEndpoint> {
        let grant = self.registry.authorize(deploy_token, TokenScope::Deploy).await?;

        let slot = self.slot(&descriptor.key).await;
        let mut slot = cancellable(cancel, slot.lock()).await?;

        let same_identity = slot.identity.as_ref() == Some(&descriptor.identity);
        let state = slot.state;
        match state {
            DeploymentState::Active if same_identity => {
                if let Some(endpoint) = &slot.endpoint {
                    debug!(function = %descriptor.key, identity = %descriptor.identity, "Reusing active deployment");
                    return Ok(endpoint.clone());
                }
            }
            DeploymentState::Active => self.mark_stale(&mut slot, descriptor).await,
            DeploymentState::Failed if same_identity => {
                let failure = slot
                    .failure
                    .clone()
                    .unwrap_or_else(|| Error::DeploymentFailed {
                        identity: descriptor.identity.to_string(),
                        cause: "unknown".to_string(),
                    });
                debug!(function = %descriptor.key, error = %failure, "Replaying recorded failure");
                return Err(failure);
            }
            DeploymentState::Resolving | DeploymentState::Building => {
                warn!(
                    function = %descriptor.key,
                    state = %state,
                    "Restarting deployment abandoned mid-cycle"
                );
            }
            _ => {}
        }

        self.run_cycle(&mut slot, descriptor, handler, &grant, cancel)
            .await
    }

    /// Explicit retry: clear a `Failed` or `Stale` slot (or rebuild an active
    /// one) and run a fresh cycle.
    pub async fn redeploy(
        &self,
        descriptor: &FunctionDescriptor,
        handler: Option<Handler>,
        deploy_token: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<RemoteEndpoint> {
        let grant = self.registry.authorize(deploy_token, TokenScope::Deploy).await?;

        let slot = self.slot(&descriptor.key).await;
        let mut slot = cancellable(cancel, slot.lock()).await?;

        if slot.state == DeploymentState::Active
            && slot.identity.as_ref() != Some(&descriptor.identity)
        {
            self.mark_stale(&mut slot, descriptor).await;
        }
        slot.failure = None;
        info!(function = %descriptor.key, previous = %slot.state, "Redeploy requested");

        self.run_cycle(&mut slot, descriptor, handler, &grant, cancel)
            .await
    }

    /// State as seen by `descriptor`: `Stale` if the slot is active for a
    /// different identity.
    ///
    /// An active deployment is checked with the backend. If the check itself
    /// fails the last known state is returned.
    pub async fn status(&self, descriptor: &FunctionDescriptor) -> DeploymentState {
        let Some(slot) = self.slots.read().await.get(&descriptor.key).cloned() else {
            return DeploymentState::Unconfigured;
        };
        let mut slot = slot.lock().await;
        if let Err(err) = self.confirm_live(&mut slot, descriptor).await {
            debug!(function = %descriptor.key, error = %err, "Status check did not confirm deployment");
        }
        if slot.identity.as_ref() == Some(&descriptor.identity) {
            return slot.state;
        }
        match slot.state {
            DeploymentState::Active | DeploymentState::Stale => DeploymentState::Stale,
            _ => DeploymentState::Unconfigured,
        }
    }

    /// Endpoint for `descriptor` without deploying.
    ///
    /// Fails with [`Error::Stale`] when the function changed since it was
    /// deployed and with [`Error::NotDeployed`] when it never was.
    pub async fn endpoint(&self, descriptor: &FunctionDescriptor) -> Result<RemoteEndpoint> {
        let not_deployed = || Error::NotDeployed(descriptor.key.to_string());
        let slot = self
            .slots
            .read()
            .await
            .get(&descriptor.key)
            .cloned()
            .ok_or_else(not_deployed)?;
        let mut slot = slot.lock().await;
        self.confirm_live(&mut slot, descriptor).await?;

        match (&slot.state, &slot.endpoint) {
            (DeploymentState::Active, Some(endpoint)) if endpoint.identity == descriptor.identity => {
                Ok(endpoint.clone())
            }
            (DeploymentState::Failed, _) if slot.identity.as_ref() == Some(&descriptor.identity) => {
                Err(slot.failure.clone().unwrap_or_else(not_deployed))
            }
            (DeploymentState::Active | DeploymentState::Stale, Some(_)) => Err(Error::Stale {
                function: descriptor.key.to_string(),
            }),
            _ => Err(not_deployed()),
        }
    }

    /// Snapshot of the slot for `key`.
    pub async fn info(&self, key: &FunctionKey) -> Option<DeploymentInfo> {
        let slot = self.slots.read().await.get(key).cloned()?;
        let slot = slot.lock().await;
        Some(DeploymentInfo {
            state: slot.state,
            identity: slot.identity.clone(),
            dependencies: slot.dependencies.clone(),
            endpoint: slot.endpoint.clone(),
            failure: slot.failure.clone(),
        })
    }

    // ========================================================================
    // Cycle
    // ========================================================================

    /// Ask the backend about the slot's active deployment of `descriptor`.
    ///
    /// Does nothing unless the slot is `Active` for this identity. A backend
    /// that reports any other state turns the slot `Failed`; an unreachable
    /// backend leaves it untouched.
    async fn confirm_live(&self, slot: &mut Slot, descriptor: &FunctionDescriptor) -> Result<()> {
        if slot.state != DeploymentState::Active
            || slot.identity.as_ref() != Some(&descriptor.identity)
        {
            return Ok(());
        }

        let reported = guarded(
            "backend status",
            self.settings.backend_timeout(),
            None,
            self.backend.get_status(&descriptor.identity),
        )
        .await?
        .map_err(|e| Error::DeploymentFailed {
            identity: descriptor.identity.to_string(),
            cause: format!("status check failed: {}", e),
        })?;
        if reported == DeploymentState::Active {
            return Ok(());
        }

        let err = Error::DeploymentFailed {
            identity: descriptor.identity.to_string(),
            cause: format!("backend reports the deployment as {}", reported),
        };
        warn!(function = %descriptor.key, reported = %reported, "Active deployment lost by backend");
        self.registry
            .set_state(&descriptor.identity, DeploymentState::Failed)
            .await;
        if let Some(endpoint) = slot.endpoint.as_mut() {
            endpoint.state = DeploymentState::Failed;
        }
        Err(slot.fail(err))
    }

    async fn mark_stale(&self, slot: &mut Slot, descriptor: &FunctionDescriptor) {
        if let Some(previous) = &slot.identity {
            self.registry.mark_stale(previous).await;
            info!(
                function = %descriptor.key,
                previous = %previous,
                identity = %descriptor.identity,
                "Function changed since last deployment"
            );
        }
        if let Some(endpoint) = slot.endpoint.as_mut() {
            endpoint.state = DeploymentState::Stale;
        }
        slot.state = DeploymentState::Stale;
    }

    async fn run_cycle(
        &self,
        slot: &mut Slot,
        descriptor: &FunctionDescriptor,
        handler: Option<Handler>,
        grant: &TokenGrant,
        cancel: Option<&CancellationToken>,
    ) -> Result<RemoteEndpoint> {
        slot.identity = Some(descriptor.identity.clone());
        slot.dependencies = None;
        slot.failure = None;

        // Resolving
        slot.state = DeploymentState::Resolving;
        debug!(function = %descriptor.key, identity = %descriptor.identity, "Resolving dependencies");
        let dependencies = match self.resolve(descriptor, cancel).await {
            Ok(dependencies) => dependencies,
            Err(err) => {
                error!(function = %descriptor.key, error = %err, "Dependency resolution failed");
                return Err(slot.fail(err));
            }
        };
        slot.dependencies = Some(dependencies.clone());

        // Building
        slot.state = DeploymentState::Building;
        let runtime = descriptor.config.resolve(&self.settings);
        let unit = DeploymentUnit::new(descriptor, dependencies, runtime, handler);
        info!(
            function = %descriptor.key,
            identity = %descriptor.identity,
            requirements = unit.dependencies.len(),
            backend = self.backend.backend_type(),
            "Requesting build"
        );

        let deadline = self.settings.backend_timeout();
        let outcome = match guarded(
            "backend build",
            deadline,
            cancel,
            self.backend.build_and_deploy(&unit),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                let err = Error::DeploymentFailed {
                    identity: descriptor.identity.to_string(),
                    cause: err.to_string(),
                };
                error!(function = %descriptor.key, error = %err, "Build request failed");
                return Err(slot.fail(err));
            }
            Err(err) => {
                warn!(function = %descriptor.key, error = %err, "Build interrupted");
                return Err(slot.fail(err));
            }
        };

        if outcome.status == BuildStatus::Failed {
            let err = Error::DeploymentFailed {
                identity: descriptor.identity.to_string(),
                cause: outcome
                    .message
                    .unwrap_or_else(|| "build failed without a message".to_string()),
            };
            error!(function = %descriptor.key, error = %err, "Build failed");
            return Err(slot.fail(err));
        }

        // Active
        let endpoint = RemoteEndpoint {
            identity: descriptor.identity.clone(),
            function: descriptor.key.clone(),
            url: outcome.url,
            token_ref: grant.id,
            owner: grant.owner.clone(),
            last_deployed: Utc::now(),
            state: DeploymentState::Active,
        };
        self.registry.register(endpoint.clone()).await;
        slot.endpoint = Some(endpoint.clone());
        slot.state = DeploymentState::Active;

        info!(function = %descriptor.key, url = %endpoint.url, "Deployment active");
        Ok(endpoint)
    }

    async fn resolve(
        &self,
        descriptor: &FunctionDescriptor,
        cancel: Option<&CancellationToken>,
    ) -> Result<DependencySet> {
        let (partial, unresolved) = match self
            .resolver
            .resolve(&descriptor.source, &descriptor.imports)?
        {
            Resolution::Resolved(set) => return Ok(set),
            Resolution::NeedsLlmFallback {
                partial,
                unresolved,
            } => (partial, unresolved),
        };

        if !self.settings.llm_enabled {
            return Err(Error::Resolution(format!(
                "unresolved symbols {} and the language-model fallback is disabled",
                unresolved.join(", ")
            )));
        }
        let analyzer = self.analyzer.as_ref().ok_or_else(|| {
            Error::Resolution(format!(
                "unresolved symbols {} and no language model is configured",
                unresolved.join(", ")
            ))
        })?;

        let analyzed = cancellable(cancel, analyzer.analyze(&descriptor.source, &unresolved)).await??;
        Ok(partial.merge(analyzed))
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: Option<&CancellationToken>,
    fut: impl Future<Output = T>,
) -> Result<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            out = fut => Ok(out),
        },
        None => Ok(fut.await),
    }
}

/// Run `fut` with a deadline, unless `cancel` fires first.
pub(crate) async fn guarded<T>(
    operation: &str,
    deadline: Duration,
    cancel: Option<&CancellationToken>,
    fut: impl Future<Output = T>,
) -> Result<T> {
    cancellable(cancel, tokio::time::timeout(deadline, fut))
        .await?
        .map_err(|_| Error::timeout(operation, deadline))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result = cancellable(Some(&token), async { 1 }).await;
        assert_eq!(result, Err(Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_times_out() {
        let result = guarded(
            "backend build",
            Duration::from_millis(50),
            None,
            std::future::pending::<()>(),
        )
        .await;
        assert_eq!(
            result,
            Err(Error::timeout("backend build", Duration::from_millis(50)))
        );
    }
}
