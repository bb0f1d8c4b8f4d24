// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wrapped callables.
//!
//! `#[remote]` leaves the annotated item untouched and adds a companion
//! `<name>_remote()` constructor returning a [`Remote`]. Calling the local
//! function always runs in-process; the wrapper adds the remote side:
//!
//! - [`Remote::get_url`] deploys on first use and returns the endpoint URL
//! - [`Remote::invoke`] calls an existing deployment with named JSON arguments
//! - [`Remote::invoke_method`] does the same for instance methods, carrying the
//!   instance's attribute map through the state store

use std::ops::Deref;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::deployment::guarded;
use crate::descriptor::{DeploymentState, FunctionDescriptor, FunctionIdentity, FunctionSpec};
use crate::error::{Error, Result};
use crate::invocation::{Handler, Invocation, InvocationOutput};
use crate::registry::{RemoteEndpoint, TokenScope};
use crate::runtime::FunctionCloud;
use crate::state_store::Stateful;

/// A local callable plus everything needed to run it remotely.
#[derive(Debug, Clone)]
pub struct Remote<F> {
    local: F,
    spec: FunctionSpec,
    descriptor: FunctionDescriptor,
    handler: Handler,
}

impl<F> Remote<F> {
    pub fn new(local: F, spec: FunctionSpec, handler: Handler) -> Self {
        let descriptor = FunctionDescriptor::from_spec(&spec);
        Self {
            local,
            spec,
            descriptor,
            handler,
        }
    }

    /// The in-process callable.
    pub fn local(&self) -> &F {
        &self.local
    }

    pub fn spec(&self) -> &FunctionSpec {
        &self.spec
    }

    pub fn identity(&self) -> &FunctionIdentity {
        &self.descriptor.identity
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Descriptor with the deployment state and resolved dependencies the
    /// manager currently holds for it.
    pub async fn descriptor(&self, cloud: &FunctionCloud) -> FunctionDescriptor {
        let mut descriptor = self.descriptor.clone();
        descriptor.state = cloud.deployments().status(&self.descriptor).await;
        if let Some(info) = cloud.deployments().info(&self.descriptor.key).await {
            if info.identity.as_ref() == Some(&self.descriptor.identity) {
                descriptor.dependencies = info.dependencies;
            }
        }
        descriptor
    }

    /// Deploy if needed and return the endpoint URL.
    pub async fn get_url(&self, cloud: &FunctionCloud, deploy_token: &str) -> Result<String> {
        Ok(self.deploy(cloud, deploy_token, None).await?.url)
    }

    /// Deploy if needed. Cancelling leaves the deployment `Failed`.
    #[instrument(skip_all, fields(function = %self.descriptor.key))]
    pub async fn deploy(
        &self,
        cloud: &FunctionCloud,
        deploy_token: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<RemoteEndpoint> {
        cloud
            .deployments()
            .ensure_deployed(
                &self.descriptor,
                Some(self.handler.clone()),
                deploy_token,
                cancel,
            )
            .await
    }

    /// Force a fresh deployment cycle, e.g. after a failure.
    pub async fn redeploy(
        &self,
        cloud: &FunctionCloud,
        deploy_token: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<RemoteEndpoint> {
        cloud
            .deployments()
            .redeploy(
                &self.descriptor,
                Some(self.handler.clone()),
                deploy_token,
                cancel,
            )
            .await
    }

    pub async fn status(&self, cloud: &FunctionCloud) -> DeploymentState {
        cloud.deployments().status(&self.descriptor).await
    }

    /// URL of the current deployment without deploying.
    pub async fn cached_url(&self, cloud: &FunctionCloud) -> Result<String> {
        Ok(cloud.deployments().endpoint(&self.descriptor).await?.url)
    }

    /// Call the deployed function with named arguments (a JSON object).
    ///
    /// Requires an existing deployment; see [`Remote::deploy_and_invoke`].
    pub async fn invoke<R: DeserializeOwned>(
        &self,
        cloud: &FunctionCloud,
        args: Value,
        invoke_token: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<R> {
        if self.descriptor.kind.is_method() {
            return Err(Error::Invocation(format!(
                "{} is a method; use invoke_method",
                self.descriptor.key
            )));
        }
        let invocation = Invocation::new(self.arguments(args)?);
        let output = self.dispatch(cloud, invocation, invoke_token, cancel).await?;
        decode(&output)
    }

    /// Deploy if needed, then invoke.
    pub async fn deploy_and_invoke<R: DeserializeOwned>(
        &self,
        cloud: &FunctionCloud,
        deploy_token: &str,
        invoke_token: &str,
        args: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<R> {
        self.deploy(cloud, deploy_token, cancel).await?;
        self.invoke(cloud, args, invoke_token, cancel).await
    }

    /// Call a deployed instance method.
    ///
    /// The instance's attributes come from its live snapshot, captured from
    /// `instance` on the first call. Attribute changes reported by the remote
    /// side are merged back into the snapshot; `instance` itself is not
    /// touched. Concurrent calls on the same instance are serialized.
    pub async fn invoke_method<T, R>(
        &self,
        cloud: &FunctionCloud,
        instance: &Stateful<T>,
        args: Value,
        invoke_token: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        if !self.descriptor.kind.is_method() {
            return Err(Error::Invocation(format!(
                "{} is not a method; use invoke",
                self.descriptor.key
            )));
        }
        // Authorize before capturing anything
        cloud
            .registry()
            .authorize(invoke_token, TokenScope::Invoke)
            .await?;

        let args = self.arguments(args)?;
        let mut lease = cloud.state_store().lock(instance).await?;
        let invocation = Invocation::new(args).with_state(lease.snapshot().attributes.clone());

        let output = self.dispatch(cloud, invocation, invoke_token, cancel).await?;
        if let Some(state) = output.state.clone() {
            let version = lease.apply_changes(state);
            debug!(object = %lease.object(), version, "Remote call updated instance state");
        }
        decode(&output)
    }

    /// Drop the remote state of `instance`; the next call starts from the
    /// local instance again.
    pub async fn reset_state<T>(&self, cloud: &FunctionCloud, instance: &Stateful<T>) -> bool {
        cloud.state_store().invalidate(&instance.object_id()).await
    }

    fn arguments(&self, args: Value) -> Result<Map<String, Value>> {
        let mut args = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(Error::Invocation(
                    "arguments must be a JSON object of named parameters".to_string(),
                ));
            }
        };
        self.descriptor.signature.apply_defaults(&mut args);
        Ok(args)
    }

    async fn dispatch(
        &self,
        cloud: &FunctionCloud,
        invocation: Invocation,
        invoke_token: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<InvocationOutput> {
        cloud
            .registry()
            .authorize(invoke_token, TokenScope::Invoke)
            .await?;
        let endpoint = cloud.deployments().endpoint(&self.descriptor).await?;

        debug!(function = %self.descriptor.key, url = %endpoint.url, "Invoking remote function");
        let runtime = self.descriptor.config.resolve(cloud.settings());
        let deadline = Duration::from_secs(runtime.timeout);
        guarded(
            "remote invocation",
            deadline,
            cancel,
            cloud
                .deployments()
                .backend()
                .invoke(&endpoint.url, invoke_token, &invocation),
        )
        .await?
        .map_err(|e| Error::Invocation(e.to_string()))
    }
}

fn decode<R: DeserializeOwned>(output: &InvocationOutput) -> Result<R> {
    output
        .decode()
        .map_err(|e| Error::Invocation(format!("unexpected result: {}", e)))
}

impl<F> Deref for Remote<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Param, Signature};
    use crate::invocation::InvokeError;
    use serde_json::json;

    fn double(x: i64) -> i64 {
        x * 2
    }

    fn wrapped() -> Remote<fn(i64) -> i64> {
        let spec = FunctionSpec::new("app", "double", "fn double(x: i64) -> i64 { x * 2 }")
            .with_signature(Signature {
                params: vec![Param::new("x", "i64").with_default(json!(21))],
                return_type: "i64".to_string(),
            });
        let handler = Handler::new(|inv: Invocation| -> std::result::Result<InvocationOutput, InvokeError> {
            InvocationOutput::value(&double(inv.arg::<i64>("x")?))
        });
        Remote::new(double as fn(i64) -> i64, spec, handler)
    }

    #[test]
    fn test_local_call_is_untouched() {
        let remote = wrapped();
        assert_eq!((remote.local())(4), 8);
        assert_eq!((*remote)(5), 10);
    }

    #[test]
    fn test_arguments_apply_defaults() {
        let remote = wrapped();
        let args = remote.arguments(Value::Null).unwrap();
        assert_eq!(args["x"], json!(21));
        assert!(matches!(
            remote.arguments(json!([1, 2])),
            Err(Error::Invocation(_))
        ));
    }

    #[tokio::test]
    async fn test_invoke_requires_deployment() {
        let cloud = FunctionCloud::builder().build().unwrap();
        let token = cloud
            .registry()
            .issue_token("tester", TokenScope::Invoke, None)
            .await;
        let result: Result<i64> = wrapped()
            .invoke(&cloud, json!({"x": 1}), token.secret(), None)
            .await;
        assert!(matches!(result, Err(Error::NotDeployed(_))));
    }
}
