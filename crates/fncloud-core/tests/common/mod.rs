// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for fncloud-core integration tests.
//!
//! Provides TestContext wiring a FunctionCloud to an in-process backend with
//! a pair of tokens.

#![allow(dead_code)]

use std::sync::Arc;

use fncloud_core::backend::LocalBackend;
use fncloud_core::dependency::PackageCatalog;
use fncloud_core::llm::{LanguageModel, ScriptedLanguageModel};
use fncloud_core::{AuthToken, FunctionCloud, Settings, TokenScope};

pub const OWNER: &str = "test-user";

/// Test context with a cloud, its backend and tokens for one owner.
pub struct TestContext {
    pub cloud: FunctionCloud,
    pub backend: Arc<LocalBackend>,
    pub deploy_token: AuthToken,
    pub invoke_token: AuthToken,
}

impl TestContext {
    /// Cloud on a default local backend, fallback disabled.
    pub async fn new() -> Self {
        Self::with_backend(LocalBackend::default()).await
    }

    pub async fn with_backend(backend: LocalBackend) -> Self {
        let settings = Settings::default().with_llm_enabled(false);
        Self::build(settings, backend, None, None).await
    }

    /// Cloud whose fallback analysis is answered by `model`.
    pub async fn with_model(model: Arc<ScriptedLanguageModel>, catalog: Option<PackageCatalog>) -> Self {
        Self::build(
            Settings::default(),
            LocalBackend::default(),
            Some(model),
            catalog,
        )
        .await
    }

    pub async fn build(
        settings: Settings,
        backend: LocalBackend,
        model: Option<Arc<ScriptedLanguageModel>>,
        catalog: Option<PackageCatalog>,
    ) -> Self {
        let backend = Arc::new(backend);
        let mut builder = FunctionCloud::builder()
            .settings(settings)
            .backend(backend.clone());
        if let Some(model) = model {
            builder = builder.language_model(model as Arc<dyn LanguageModel>);
        }
        if let Some(catalog) = catalog {
            builder = builder.catalog(catalog);
        }
        let cloud = builder.build().expect("Failed to build function cloud");

        let deploy_token = cloud
            .registry()
            .issue_token(OWNER, TokenScope::Deploy, None)
            .await;
        let invoke_token = cloud
            .registry()
            .issue_token(OWNER, TokenScope::Invoke, None)
            .await;

        Self {
            cloud,
            backend,
            deploy_token,
            invoke_token,
        }
    }

    pub fn deploy(&self) -> &str {
        self.deploy_token.secret()
    }

    pub fn invoke(&self) -> &str {
        self.invoke_token.secret()
    }
}
