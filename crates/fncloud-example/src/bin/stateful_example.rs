// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stateful Example - Demonstrates instance state across remote method calls.
//!
//! A `Counter` method is deployed once. Each remote call receives the
//! counter's attributes from the state store and reports the mutated
//! attributes back, so consecutive calls continue counting even though the
//! remote side keeps nothing between calls. The local instance is untouched.
//!
//! Run with: cargo run -p fncloud-example --bin stateful_example

use std::time::Duration;

use fncloud_core::{FunctionCloud, Settings, Stateful, TokenScope, remote};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counter {
    pub count: u64,
    pub label: String,
    /// Not part of the remote state
    #[serde(skip)]
    pub local_hits: u32,
}

impl Counter {
    #[remote]
    pub fn increment(&mut self, by: u64) -> u64 {
        self.count += by;
        self.count
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

    info!("=== Stateful Example: Instance State Continuity ===");

    let cloud = FunctionCloud::builder()
        .settings(Settings::from_env()?.with_llm_enabled(false))
        .build()?;
    let deploy_token = cloud
        .registry()
        .issue_token("demo-user", TokenScope::Deploy, None)
        .await;
    let invoke_token = cloud
        .registry()
        .issue_token("demo-user", TokenScope::Invoke, None)
        .await;

    let mut counter = Stateful::new(Counter {
        label: "visits".to_string(),
        ..Default::default()
    })
    .with_ttl(Duration::from_secs(600));

    // Local call through Deref
    counter.local_hits += 1;
    info!(count = counter.increment(1), "Local increment");

    let increment = Counter::increment_remote();
    let url = increment.get_url(&cloud, deploy_token.secret()).await?;
    info!(url = %url, "Deployed Counter::increment");

    for by in [10, 20] {
        let count: u64 = increment
            .invoke_method(&cloud, &counter, json!({"by": by}), invoke_token.secret(), None)
            .await?;
        info!(by, count, "Remote increment");
    }

    let object = counter.object_id();
    let stored: Option<Counter> = cloud.state_store().restore(&object).await?;
    info!(local = counter.count, remote = ?stored.map(|c| c.count), "Local vs remote state");

    increment.reset_state(&cloud, &counter).await;
    let count: u64 = increment
        .invoke_method(&cloud, &counter, json!({"by": 1}), invoke_token.secret(), None)
        .await?;
    info!(count, "After reset the remote side starts from the local instance");

    info!("=== Stateful Example Complete ===");
    Ok(())
}
