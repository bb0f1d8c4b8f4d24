// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Basic Example - Demonstrates the fundamental fncloud lifecycle.
//!
//! This example shows:
//! - Local calls of a `#[remote]` function
//! - Token issuance
//! - Lazy deployment through `get_url()`
//! - Idempotent redeployment and remote invocation
//! - An HTTP endpoint with custom methods
//!
//! Everything runs on the in-process backend.
//!
//! Run with: cargo run -p fncloud-example --bin basic_example

use std::sync::Arc;

use fncloud_core::backend::LocalBackend;
use fncloud_core::{FunctionCloud, Settings, TokenScope, remote};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Greeting {
    pub message: String,
    pub length: usize,
}

/// Plain function, remotely deployable with larger memory.
#[remote(memory = 2048, default(b = 1))]
pub fn add(a: i64, b: i64) -> i64 {
    a + b
}

/// HTTP endpoint answering GET and POST.
#[remote(endpoint(methods = "GET, POST"), timeout = 30, imports = "self::Greeting")]
pub fn greet(name: String) -> Greeting {
    let message = format!("Hello, {}!", name);
    Greeting {
        length: message.len(),
        message,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("=== Basic Example: fncloud Lifecycle ===");

    // Local calls never touch the cloud
    info!(result = add(2, 3), "Local call");

    // The demo has no language-model key, so the fallback stays off
    let settings = Settings::from_env()?.with_llm_enabled(false);
    let backend = Arc::new(LocalBackend::new(settings.app_name.clone()));
    let cloud = FunctionCloud::builder()
        .settings(settings)
        .backend(backend.clone())
        .build()?;

    let deploy_token = cloud
        .registry()
        .issue_token("demo-user", TokenScope::Deploy, None)
        .await;
    let invoke_token = cloud
        .registry()
        .issue_token("demo-user", TokenScope::Invoke, None)
        .await;

    let add_fn = add_remote();
    info!(identity = %add_fn.identity(), state = %add_fn.status(&cloud).await, "Before deployment");

    let url = add_fn.get_url(&cloud, deploy_token.secret()).await?;
    info!(url = %url, "Deployed add");

    // Same identity: no second build
    let again = add_fn.get_url(&cloud, deploy_token.secret()).await?;
    info!(same_url = (url == again), builds = backend.build_count(), "Second get_url");

    let sum: i64 = add_fn
        .invoke(&cloud, json!({"a": 40}), invoke_token.secret(), None)
        .await?;
    info!(sum, "Remote call with default b = 1");

    let greet_fn = greet_remote();
    let greeting: Greeting = greet_fn
        .deploy_and_invoke(
            &cloud,
            deploy_token.secret(),
            invoke_token.secret(),
            json!({"name": "world"}),
            None,
        )
        .await?;
    info!(message = %greeting.message, length = greeting.length, "Endpoint response");

    for deployment in cloud.dashboard().list_deployments("demo-user").await {
        println!("{:<40} {:<8} {}", deployment.function, deployment.state, deployment.url);
    }

    info!("=== Basic Example Complete ===");
    Ok(())
}
