// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution backend trait definitions.
//!
//! Defines the abstract interface to the remote execution backend: "build this
//! image, run this callable, expose this route".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dependency::DependencySet;
use crate::descriptor::{
    DeploymentState, FunctionDescriptor, FunctionIdentity, FunctionKey, Kind, RuntimeConfig,
    Signature,
};
use crate::invocation::{Handler, Invocation, InvocationOutput};

/// Errors from backend operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The backend rejected or failed the build.
    #[error("{0}")]
    BuildFailed(String),

    /// No deployment exists at the given identity or URL.
    #[error("Deployment not found: {0}")]
    NotFound(String),

    /// The backend refused the credential.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The deployed callable failed.
    #[error("Invocation failed: {0}")]
    InvocationFailed(String),

    /// Network or protocol failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// The callable to run remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallableRef {
    /// Qualified name of the function
    pub symbol: FunctionKey,
    pub kind: Kind,
    pub signature: Signature,
    /// Source text of the callable
    pub source: String,
    /// In-process entry point; only usable by backends sharing the process
    #[serde(skip)]
    pub handler: Option<Handler>,
}

/// Everything the backend needs to build and expose one function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentUnit {
    pub identity: FunctionIdentity,
    /// Route path, e.g. `app-models-add-3f2a9c1d0b4e5f67`
    pub route: String,
    pub dependencies: DependencySet,
    pub runtime: RuntimeConfig,
    pub callable: CallableRef,
}

impl DeploymentUnit {
    /// Compose a unit from a resolved descriptor.
    pub fn new(
        descriptor: &FunctionDescriptor,
        dependencies: DependencySet,
        runtime: RuntimeConfig,
        handler: Option<Handler>,
    ) -> Self {
        Self {
            identity: descriptor.identity.clone(),
            route: route_path(&descriptor.key, &descriptor.identity),
            dependencies,
            runtime,
            callable: CallableRef {
                symbol: descriptor.key.clone(),
                kind: descriptor.kind.clone(),
                signature: descriptor.signature.clone(),
                source: descriptor.source.clone(),
                handler,
            },
        }
    }
}

/// `<module-path>-<name>-<identity>` with `::` and `_` turned into `-`.
pub fn route_path(key: &FunctionKey, identity: &FunctionIdentity) -> String {
    let name = key.as_str().replace("::", "-").replace('_', "-").to_lowercase();
    format!("{}-{}", name, identity)
}

/// Backend build result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Ready,
    Failed,
}

/// What `build_and_deploy` reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub url: String,
    pub status: BuildStatus,
    /// Failure cause or build log tail, passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Trait for execution backends.
///
/// Backends do not track descriptors, tokens or staleness; that is the
/// deployment manager's job. They only build, report and run.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Backend type identifier (e.g., "local", "http")
    fn backend_type(&self) -> &'static str;

    /// Build an image for the unit and expose its route.
    async fn build_and_deploy(&self, unit: &DeploymentUnit) -> Result<BuildOutcome>;

    /// Current state of a deployment as the backend sees it.
    async fn get_status(&self, identity: &FunctionIdentity) -> Result<DeploymentState>;

    /// Call a deployed function. `token` is the caller's invoke credential.
    async fn invoke(&self, url: &str, token: &str, invocation: &Invocation)
    -> Result<InvocationOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FunctionSpec;

    #[test]
    fn test_route_path_scheme() {
        let spec = FunctionSpec::new("billing::tax_rules", "apply_vat", "fn apply_vat() {}");
        let descriptor = FunctionDescriptor::from_spec(&spec);
        let route = route_path(&descriptor.key, &descriptor.identity);
        assert_eq!(route, format!("billing-tax-rules-apply-vat-{}", descriptor.identity));
    }

    #[test]
    fn test_unit_serialization_skips_handler() {
        let spec = FunctionSpec::new("app", "ping", "fn ping() {}").with_kind(Kind::endpoint());
        let descriptor = FunctionDescriptor::from_spec(&spec);
        let runtime = descriptor.config.resolve(&crate::config::Settings::default());
        let unit = DeploymentUnit::new(
            &descriptor,
            DependencySet::new(),
            runtime,
            Some(Handler::new(|_| Ok(InvocationOutput::default()))),
        );

        let json = serde_json::to_value(&unit).unwrap();
        assert!(json["callable"].get("handler").is_none());
        assert_eq!(json["callable"]["kind"]["methods"], serde_json::json!(["GET", "POST"]));
        assert_eq!(json["runtime"]["region"], "us-east");
    }
}
