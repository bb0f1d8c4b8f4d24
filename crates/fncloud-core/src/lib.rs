// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! fncloud - Function Deployment Core
//!
//! Annotate an ordinary function or method with [`remote`] and it stays an
//! ordinary function, while its companion `<name>_remote()` wrapper can deploy
//! it to an execution backend and hand back a routable URL.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 #[remote] fn / method  →  Remote<F>                   │
//! └──────────────────────────────────────────────────────────────────────┘
//!            │ get_url / deploy                   │ invoke / invoke_method
//!            ▼                                    ▼
//! ┌──────────────────────┐             ┌──────────────────────┐
//! │  DeploymentManager   │             │     StateStore       │
//! │  (slot per function) │             │ (instance snapshots) │
//! └──────────────────────┘             └──────────────────────┘
//!      │            │                             │
//!      ▼            ▼                             ▼
//! ┌──────────┐ ┌──────────────────┐    ┌──────────────────────┐
//! │ Resolver │ │ ExecutionBackend │◄───│  invoke(url, token)  │
//! └────┬─────┘ │  (local / http)  │    └──────────────────────┘
//!      │       └────────┬─────────┘
//!      │ unresolved     │ url
//!      ▼                ▼
//! ┌──────────┐ ┌──────────────────┐    ┌──────────────────────┐
//! │ Fallback │ │  URL/Token       │◄───│      Dashboard       │
//! │ Analyzer │ │  Registry        │    │    (read-only)       │
//! └──────────┘ └──────────────────┘    └──────────────────────┘
//! ```
//!
//! # Deployment State Machine
//!
//! ```text
//!  ┌──────────────┐    ┌───────────┐    ┌──────────┐    ┌────────┐
//!  │ UNCONFIGURED │───►│ RESOLVING │───►│ BUILDING │───►│ ACTIVE │
//!  └──────────────┘    └─────┬─────┘    └────┬─────┘    └───┬────┘
//!                            │               │              │ source changed
//!                            ▼               ▼              ▼
//!                       ┌─────────────────────────┐    ┌─────────┐
//!                       │         FAILED          │    │  STALE  │
//!                       └─────────────────────────┘    └─────────┘
//!                         redeploy ─► RESOLVING       next deploy ─► RESOLVING
//! ```
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FC_TOKEN` / `MODAL_TOKEN` | - | Backend credential |
//! | `FC_REGION` | `us-east` | Deployment region |
//! | `FC_MEMORY` | `1024` | Memory in MB |
//! | `FC_TIMEOUT` | `60` | Function timeout in seconds |
//! | `FC_CPU` | `1` | CPU count |
//! | `FC_LLM_ENABLED` | `true` | Enable the language-model fallback |
//! | `FC_LLM_PROVIDER` | `groq` | `groq` or `openai` |
//! | `GROQ_API_KEY` / `FC_LLM_API_KEY` | - | Language-model API key |
//! | `FC_APP_NAME` | `fc_app` | Application name used in URLs |
//! | `FC_LLM_TIMEOUT_MS` | `30000` | Fallback analysis deadline |
//! | `FC_BACKEND_TIMEOUT_MS` | `300000` | Build request deadline |
//! | `FC_STATE_TTL_SECS` | - | Default instance state TTL |
//!
//! # Modules
//!
//! - [`backend`]: Execution backend seam plus local and HTTP backends
//! - [`config`]: Settings from environment variables or a JSON file
//! - [`dashboard`]: Read-only token and deployment queries
//! - [`dependency`]: Static dependency resolution
//! - [`deployment`]: Deployment state machine
//! - [`llm`]: Language-model fallback analysis
//! - [`registry`]: Endpoints and tokens
//! - [`remote`]: Wrapped callables
//! - [`state_store`]: Instance state between remote method calls

/// Execution backends.
pub mod backend;

/// Settings loaded from environment variables or a config file.
pub mod config;

/// Dashboard facade.
pub mod dashboard;

/// Static dependency resolution.
pub mod dependency;

/// Deployment lifecycle per function.
pub mod deployment;

/// Function metadata, identities and deployment states.
pub mod descriptor;

/// Error types.
pub mod error;

/// JSON invocation adapter.
pub mod invocation;

/// Language-model fallback.
pub mod llm;

/// URL/Token registry.
pub mod registry;

/// `Remote<F>` wrapper.
pub mod remote;

/// Runtime wiring.
pub mod runtime;

/// Instance state continuity.
pub mod state_store;

pub use config::{LlmProvider, Settings};
pub use dashboard::{Dashboard, DeploymentSummary, TokenValidation};
pub use dependency::{DependencySet, DependencySource, Requirement};
pub use deployment::{DeploymentInfo, DeploymentManager};
pub use descriptor::{
    DeploymentConfig, DeploymentState, FunctionDescriptor, FunctionIdentity, FunctionKey,
    FunctionSpec, HttpMethod, Kind, Param, Signature,
};
pub use error::{Error, Result};
pub use invocation::{Handler, Invocation, InvocationOutput, InvokeError};
pub use registry::{AuthToken, Registry, RemoteEndpoint, TokenGrant, TokenId, TokenScope};
pub use remote::Remote;
pub use runtime::{FunctionCloud, FunctionCloudBuilder};
pub use state_store::{InstanceStateSnapshot, ObjectId, StateLease, StateStore, Stateful};

pub use fncloud_macros::remote;

// Tokio cancellation re-exported for callers of `deploy`/`invoke`
pub use tokio_util::sync::CancellationToken;

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
