// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime facade.
//!
//! [`FunctionCloud`] wires the registry, resolver, fallback analyzer,
//! deployment manager, state store and execution backend together. It is
//! built explicitly and passed to every wrapped function that needs it;
//! there is no global instance.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fncloud_core::{FunctionCloud, Settings, TokenScope, backend::LocalBackend, remote};
//!
//! #[remote]
//! fn add(a: i64, b: i64) -> i64 {
//!     a + b
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cloud = FunctionCloud::builder()
//!         .settings(Settings::from_env()?)
//!         .backend(Arc::new(LocalBackend::default()))
//!         .build()?;
//!
//!     let token = cloud.registry().issue_token("me", TokenScope::Deploy, None).await;
//!     let url = add_remote().get_url(&cloud, token.secret()).await?;
//!     println!("{url}");
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{ExecutionBackend, LocalBackend};
use crate::config::Settings;
use crate::dashboard::Dashboard;
use crate::dependency::{DependencyResolver, PackageCatalog};
use crate::deployment::DeploymentManager;
use crate::error::Result;
use crate::llm::{FallbackAnalyzer, HttpLanguageModel, LanguageModel};
use crate::registry::Registry;
use crate::state_store::StateStore;

/// Builder for creating a [`FunctionCloud`].
#[derive(Default)]
pub struct FunctionCloudBuilder {
    settings: Option<Settings>,
    backend: Option<Arc<dyn ExecutionBackend>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    catalog: Option<PackageCatalog>,
    registry: Option<Arc<Registry>>,
}

impl FunctionCloudBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the settings.
    ///
    /// Default: [`Settings::default()`]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Set the execution backend.
    ///
    /// Default: an in-process [`LocalBackend`] routed under `settings.app_name`.
    pub fn backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the language model used by the dependency fallback.
    ///
    /// Default: an [`HttpLanguageModel`] when the fallback is enabled and an
    /// API key is configured, otherwise none.
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    /// Set the package catalog.
    ///
    /// Default: [`PackageCatalog::builtin()`]
    pub fn catalog(mut self, catalog: PackageCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Share an existing registry (e.g. with a dashboard process).
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Result<FunctionCloud> {
        let settings = self.settings.unwrap_or_default();
        settings.validate()?;
        let settings = Arc::new(settings);

        let language_model = match self.language_model {
            Some(model) => Some(model),
            None if settings.llm_enabled && settings.llm_api_key.is_some() => {
                Some(Arc::new(HttpLanguageModel::from_settings(&settings)?) as Arc<dyn LanguageModel>)
            }
            None => None,
        };
        let analyzer =
            language_model.map(|model| FallbackAnalyzer::new(model, settings.llm_timeout()));

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(LocalBackend::new(settings.app_name.clone())));
        let registry = self.registry.unwrap_or_default();
        let resolver = DependencyResolver::new(self.catalog.unwrap_or_else(PackageCatalog::builtin));
        let state_store = Arc::new(StateStore::new(settings.state_ttl()));

        debug!(?settings, "Function cloud settings");
        info!(
            backend = backend.backend_type(),
            llm_fallback = analyzer.is_some(),
            region = %settings.region,
            "Function cloud ready"
        );

        let deployments = Arc::new(DeploymentManager::new(
            Arc::clone(&settings),
            Arc::clone(&registry),
            resolver,
            analyzer,
            backend,
        ));

        Ok(FunctionCloud {
            settings,
            registry,
            state_store,
            deployments,
        })
    }
}

/// The deployment core, assembled.
#[derive(Clone)]
pub struct FunctionCloud {
    settings: Arc<Settings>,
    registry: Arc<Registry>,
    state_store: Arc<StateStore>,
    deployments: Arc<DeploymentManager>,
}

impl FunctionCloud {
    /// Create a builder.
    pub fn builder() -> FunctionCloudBuilder {
        FunctionCloudBuilder::new()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn state_store(&self) -> &Arc<StateStore> {
        &self.state_store
    }

    pub fn deployments(&self) -> &Arc<DeploymentManager> {
        &self.deployments
    }

    /// Read-only view for the dashboard.
    pub fn dashboard(&self) -> Dashboard {
        Dashboard::new(Arc::clone(&self.registry))
    }
}
