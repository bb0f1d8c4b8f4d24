// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function descriptors.
//!
//! A [`FunctionSpec`] is what `#[remote]` captures at the declaration site:
//! name, module path, kind, parameters, captured source and per-function
//! overrides. A [`FunctionDescriptor`] is derived from it and adds the stable
//! identity, the resolved dependency set and the current deployment state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::Settings;
use crate::dependency::DependencySet;

/// HTTP method accepted by an endpoint function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Methods an endpoint accepts when none are declared.
    pub const DEFAULT: &'static [HttpMethod] = &[HttpMethod::Get, HttpMethod::Post];
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(format!("Unknown HTTP method: {}", s)),
        }
    }
}

/// What kind of callable was wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Kind {
    /// A free function.
    Function,
    /// An instance method; remote calls go through the state store.
    Method,
    /// A free function exposed as an HTTP endpoint.
    Endpoint {
        /// Accepted HTTP methods
        methods: Vec<HttpMethod>,
    },
}

impl Kind {
    /// Endpoint with the default methods (`GET`, `POST`).
    pub fn endpoint() -> Self {
        Kind::Endpoint {
            methods: HttpMethod::DEFAULT.to_vec(),
        }
    }

    /// Whether remote calls carry instance state.
    pub fn is_method(&self) -> bool {
        matches!(self, Kind::Method)
    }

    /// HTTP methods carried in the deployment unit. Empty for non-endpoints.
    pub fn http_methods(&self) -> &[HttpMethod] {
        match self {
            Kind::Endpoint { methods } => methods,
            _ => &[],
        }
    }
}

/// One declared parameter of a wrapped callable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Parameter type as written in source
    #[serde(rename = "type")]
    pub ty: String,
    /// Value used when an invocation omits the argument
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Ordered parameter list plus return type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Param>,
    pub return_type: String,
}

impl Signature {
    /// Fill in defaults for arguments the caller left out.
    pub fn apply_defaults(&self, args: &mut Map<String, Value>) {
        for param in &self.params {
            if let Some(default) = &param.default
                && !args.contains_key(&param.name)
            {
                args.insert(param.name.clone(), default.clone());
            }
        }
    }
}

/// Per-function deployment overrides. `None` falls back to [`Settings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub memory: Option<u32>,
    pub cpu: Option<u32>,
    pub timeout: Option<u64>,
    pub region: Option<String>,
}

impl DeploymentConfig {
    /// Apply the overrides on top of the global defaults.
    pub fn resolve(&self, settings: &Settings) -> RuntimeConfig {
        RuntimeConfig {
            memory: self.memory.unwrap_or(settings.memory),
            cpu: self.cpu.unwrap_or(settings.cpu),
            timeout: self.timeout.unwrap_or(settings.timeout),
            region: self
                .region
                .clone()
                .unwrap_or_else(|| settings.region.clone()),
        }
    }
}

/// Fully resolved runtime configuration sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Memory in MB
    pub memory: u32,
    pub cpu: u32,
    /// Timeout in seconds
    pub timeout: u64,
    pub region: String,
}

/// Metadata captured by `#[remote]` where the callable is declared.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    /// Bare function name
    pub name: &'static str,
    /// `module_path!()` at the declaration site
    pub module_path: &'static str,
    /// Declaring type for methods (`std::any::type_name::<Self>()`)
    pub class: Option<&'static str>,
    pub kind: Kind,
    pub signature: Signature,
    /// Source text of the item
    pub source: &'static str,
    /// Extra imports the resolver should consider
    pub imports: Vec<&'static str>,
    pub config: DeploymentConfig,
}

impl FunctionSpec {
    /// Minimal spec for a free function. Mostly useful in tests.
    pub fn new(module_path: &'static str, name: &'static str, source: &'static str) -> Self {
        Self {
            name,
            module_path,
            class: None,
            kind: Kind::Function,
            signature: Signature::default(),
            source,
            imports: Vec::new(),
            config: DeploymentConfig::default(),
        }
    }

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_class(mut self, class: &'static str) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_imports(mut self, imports: Vec<&'static str>) -> Self {
        self.imports = imports;
        self
    }

    pub fn with_config(mut self, config: DeploymentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// `module::path::name`, or `module::path::Type::name` for methods.
    pub fn qualified_name(&self) -> String {
        match self.class {
            Some(class) => format!("{}::{}", class, self.name),
            None => format!("{}::{}", self.module_path, self.name),
        }
    }
}

/// Stable identity: hash of the qualified name and the captured source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionIdentity(String);

impl FunctionIdentity {
    /// First 16 hex chars of `SHA-256(qualified_name + "\n" + source)`.
    pub fn compute(qualified_name: &str, source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(qualified_name.as_bytes());
        hasher.update(b"\n");
        hasher.update(source.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Qualified name; one deployment slot exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionKey(String);

impl FunctionKey {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self(qualified_name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deployment lifecycle of one function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    #[default]
    Unconfigured,
    Resolving,
    Building,
    Active,
    Failed,
    Stale,
}

impl DeploymentState {
    /// Whether a cycle is in progress.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, DeploymentState::Resolving | DeploymentState::Building)
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentState::Unconfigured => write!(f, "unconfigured"),
            DeploymentState::Resolving => write!(f, "resolving"),
            DeploymentState::Building => write!(f, "building"),
            DeploymentState::Active => write!(f, "active"),
            DeploymentState::Failed => write!(f, "failed"),
            DeploymentState::Stale => write!(f, "stale"),
        }
    }
}

/// Everything the deployment manager needs to know about one callable.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub identity: FunctionIdentity,
    pub key: FunctionKey,
    pub kind: Kind,
    pub signature: Signature,
    /// Source text handed to the resolver
    pub source: String,
    /// Declared imports handed to the resolver
    pub imports: Vec<String>,
    /// `None` until resolved
    pub dependencies: Option<DependencySet>,
    pub config: DeploymentConfig,
    pub state: DeploymentState,
}

impl FunctionDescriptor {
    /// Build a descriptor from captured metadata.
    pub fn from_spec(spec: &FunctionSpec) -> Self {
        let qualified = spec.qualified_name();
        Self {
            identity: FunctionIdentity::compute(&qualified, spec.source),
            key: FunctionKey::new(qualified),
            kind: spec.kind.clone(),
            signature: spec.signature.clone(),
            source: spec.source.to_string(),
            imports: spec.imports.iter().map(|s| s.to_string()).collect(),
            dependencies: None,
            config: spec.config.clone(),
            state: DeploymentState::Unconfigured,
        }
    }

    /// Bare function name (last path segment of the key).
    pub fn name(&self) -> &str {
        self.key
            .as_str()
            .rsplit("::")
            .next()
            .unwrap_or(self.key.as_str())
    }
}
