// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Settings for the deployment core.
//!
//! `Settings` is constructed once and handed to [`crate::runtime::FunctionCloudBuilder`],
//! which threads it into the resolver, deployment manager and registry. There
//! is no process-wide default instance.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Language-model provider used by the dependency fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Groq (OpenAI-compatible API)
    #[default]
    Groq,
    /// OpenAI
    OpenAi,
}

impl LlmProvider {
    /// Base URL of the provider's OpenAI-compatible API.
    pub fn api_base(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Model used when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "llama3-8b-8192",
            LlmProvider::OpenAi => "gpt-4",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Groq => write!(f, "groq"),
            LlmProvider::OpenAi => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "groq" => Ok(LlmProvider::Groq),
            "openai" => Ok(LlmProvider::OpenAi),
            _ => Err(ConfigError::Invalid("FC_LLM_PROVIDER", "must be groq or openai")),
        }
    }
}

/// Resolved settings consumed by the core.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend credential forwarded to the remote execution backend
    pub token: Option<String>,
    /// Default region (default: "us-east")
    pub region: String,
    /// Default memory in MB (default: 1024)
    pub memory: u32,
    /// Default function timeout in seconds (default: 60)
    pub timeout: u64,
    /// Default CPU allocation (default: 1)
    pub cpu: u32,
    /// Whether ambiguous dependencies may be sent to the language model (default: true)
    pub llm_enabled: bool,
    /// Language-model provider (default: groq)
    pub llm_provider: LlmProvider,
    /// API key for the language-model provider
    pub llm_api_key: Option<String>,
    /// Model override
    pub llm_model: Option<String>,
    /// Application name used as the route prefix (default: "fc_app")
    pub app_name: String,
    /// Deadline for one fallback analysis, retries included (default: 30_000)
    pub llm_timeout_ms: u64,
    /// Deadline for one backend call (default: 300_000)
    pub backend_timeout_ms: u64,
    /// TTL for instance state snapshots; `None` keeps them until reset
    pub state_ttl_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            token: None,
            region: "us-east".to_string(),
            memory: 1024,
            timeout: 60,
            cpu: 1,
            llm_enabled: true,
            llm_provider: LlmProvider::Groq,
            llm_api_key: None,
            llm_model: None,
            app_name: "fc_app".to_string(),
            llm_timeout_ms: 30_000,
            backend_timeout_ms: 300_000,
            state_ttl_secs: None,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("memory", &self.memory)
            .field("timeout", &self.timeout)
            .field("cpu", &self.cpu)
            .field("llm_enabled", &self.llm_enabled)
            .field("llm_provider", &self.llm_provider)
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "<redacted>"))
            .field("llm_model", &self.llm_model)
            .field("app_name", &self.app_name)
            .field("llm_timeout_ms", &self.llm_timeout_ms)
            .field("backend_timeout_ms", &self.backend_timeout_ms)
            .field("state_ttl_secs", &self.state_ttl_secs)
            .finish()
    }
}

impl Settings {
    /// Create settings with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from environment variables on top of the defaults.
    ///
    /// # Environment Variables
    /// - `FC_TOKEN`, else `MODAL_TOKEN`, else `MODAL_TOKEN_ID:MODAL_TOKEN_SECRET`
    /// - `FC_REGION`, `FC_MEMORY`, `FC_TIMEOUT`, `FC_CPU`
    /// - `FC_LLM_ENABLED`, `FC_LLM_PROVIDER`, `FC_LLM_MODEL`
    /// - `FC_LLM_API_KEY`, else `GROQ_API_KEY`
    /// - `FC_APP_NAME`
    /// - `FC_LLM_TIMEOUT_MS`, `FC_BACKEND_TIMEOUT_MS`, `FC_STATE_TTL_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        settings.token = env::var("FC_TOKEN")
            .or_else(|_| env::var("MODAL_TOKEN"))
            .ok()
            .or_else(|| {
                match (env::var("MODAL_TOKEN_ID"), env::var("MODAL_TOKEN_SECRET")) {
                    (Ok(id), Ok(secret)) => Some(format!("{}:{}", id, secret)),
                    _ => None,
                }
            });

        if let Ok(region) = env::var("FC_REGION") {
            settings.region = region;
        }
        if let Some(memory) = parse_var("FC_MEMORY", "must be a positive integer (MB)")? {
            settings.memory = memory;
        }
        if let Some(timeout) = parse_var("FC_TIMEOUT", "must be a positive integer (seconds)")? {
            settings.timeout = timeout;
        }
        if let Some(cpu) = parse_var("FC_CPU", "must be a positive integer")? {
            settings.cpu = cpu;
        }
        if let Ok(enabled) = env::var("FC_LLM_ENABLED") {
            settings.llm_enabled = enabled == "true" || enabled == "1";
        }
        if let Ok(provider) = env::var("FC_LLM_PROVIDER") {
            settings.llm_provider = provider.parse()?;
        }
        settings.llm_model = env::var("FC_LLM_MODEL").ok();
        settings.llm_api_key = env::var("FC_LLM_API_KEY")
            .or_else(|_| env::var("GROQ_API_KEY"))
            .ok();
        if let Ok(app_name) = env::var("FC_APP_NAME") {
            settings.app_name = app_name;
        }
        if let Some(ms) = parse_var("FC_LLM_TIMEOUT_MS", "must be milliseconds")? {
            settings.llm_timeout_ms = ms;
        }
        if let Some(ms) = parse_var("FC_BACKEND_TIMEOUT_MS", "must be milliseconds")? {
            settings.backend_timeout_ms = ms;
        }
        settings.state_ttl_secs = parse_var("FC_STATE_TTL_SECS", "must be seconds")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file such as `~/.function_cloud/config.json`.
    ///
    /// Missing keys keep their defaults. The legacy `groq_api_key` and
    /// `modal_token_id`/`modal_token_secret` keys are honoured.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;

        let mut settings: Settings = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;

        if settings.llm_api_key.is_none() {
            settings.llm_api_key = value
                .get("groq_api_key")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
        if settings.token.is_none()
            && let (Some(id), Some(secret)) = (
                value.get("modal_token_id").and_then(|v| v.as_str()),
                value.get("modal_token_secret").and_then(|v| v.as_str()),
            )
        {
            settings.token = Some(format!("{}:{}", id, secret));
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory == 0 {
            return Err(ConfigError::Invalid("memory", "must be greater than zero"));
        }
        if self.cpu == 0 {
            return Err(ConfigError::Invalid("cpu", "must be greater than zero"));
        }
        if self.timeout == 0 {
            return Err(ConfigError::Invalid("timeout", "must be greater than zero"));
        }
        if self.app_name.is_empty() {
            return Err(ConfigError::Invalid("app_name", "must not be empty"));
        }
        Ok(())
    }

    /// Deadline for one fallback analysis.
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }

    /// Deadline for one backend call.
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    /// Snapshot TTL, if any.
    pub fn state_ttl(&self) -> Option<Duration> {
        self.state_ttl_secs.map(Duration::from_secs)
    }

    /// Model used by the fallback analyzer.
    pub fn llm_model(&self) -> &str {
        self.llm_model
            .as_deref()
            .unwrap_or_else(|| self.llm_provider.default_model())
    }

    /// Set the backend credential.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the default region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the default memory in MB.
    pub fn with_memory(mut self, memory: u32) -> Self {
        self.memory = memory;
        self
    }

    /// Set the default function timeout in seconds.
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the default CPU allocation.
    pub fn with_cpu(mut self, cpu: u32) -> Self {
        self.cpu = cpu;
        self
    }

    /// Enable or disable the language-model fallback.
    pub fn with_llm_enabled(mut self, enabled: bool) -> Self {
        self.llm_enabled = enabled;
        self
    }

    /// Set the language-model provider.
    pub fn with_llm_provider(mut self, provider: LlmProvider) -> Self {
        self.llm_provider = provider;
        self
    }

    /// Set the language-model API key.
    pub fn with_llm_api_key(mut self, key: impl Into<String>) -> Self {
        self.llm_api_key = Some(key.into());
        self
    }

    /// Set the application name used in routes.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the fallback analysis deadline.
    pub fn with_llm_timeout_ms(mut self, ms: u64) -> Self {
        self.llm_timeout_ms = ms;
        self
    }

    /// Set the backend call deadline.
    pub fn with_backend_timeout_ms(mut self, ms: u64) -> Self {
        self.backend_timeout_ms = ms;
        self
    }

    /// Set the snapshot TTL.
    pub fn with_state_ttl_secs(mut self, secs: u64) -> Self {
        self.state_ttl_secs = Some(secs);
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    hint: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(name, hint)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range or malformed.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),

    /// The settings file could not be read or parsed.
    #[error("failed to load settings file {0}")]
    File(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Serializes tests that touch process environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX
                match value {
                    Some(v) => unsafe { env::set_var(&key, v) },
                    None => unsafe { env::remove_var(&key) },
                }
            }
        }
    }

    const ALL_VARS: &[&str] = &[
        "FC_TOKEN",
        "MODAL_TOKEN",
        "MODAL_TOKEN_ID",
        "MODAL_TOKEN_SECRET",
        "FC_REGION",
        "FC_MEMORY",
        "FC_TIMEOUT",
        "FC_CPU",
        "FC_LLM_ENABLED",
        "FC_LLM_PROVIDER",
        "FC_LLM_MODEL",
        "FC_LLM_API_KEY",
        "GROQ_API_KEY",
        "FC_APP_NAME",
        "FC_LLM_TIMEOUT_MS",
        "FC_BACKEND_TIMEOUT_MS",
        "FC_STATE_TTL_SECS",
    ];

    fn clean_env() -> EnvGuard {
        let mut guard = EnvGuard::new();
        for var in ALL_VARS {
            guard.remove(var);
        }
        guard
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.region, "us-east");
        assert_eq!(settings.memory, 1024);
        assert_eq!(settings.timeout, 60);
        assert_eq!(settings.cpu, 1);
        assert!(settings.llm_enabled);
        assert_eq!(settings.llm_provider, LlmProvider::Groq);
        assert_eq!(settings.app_name, "fc_app");
        assert_eq!(settings.llm_model(), "llama3-8b-8192");
        assert!(settings.state_ttl().is_none());
    }

    #[test]
    fn test_from_env_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = clean_env();
        guard.set("FC_REGION", "eu-west");
        guard.set("FC_MEMORY", "2048");
        guard.set("FC_CPU", "4");
        guard.set("FC_LLM_PROVIDER", "openai");
        guard.set("FC_LLM_ENABLED", "false");
        guard.set("MODAL_TOKEN_ID", "ak-1");
        guard.set("MODAL_TOKEN_SECRET", "as-2");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.region, "eu-west");
        assert_eq!(settings.memory, 2048);
        assert_eq!(settings.cpu, 4);
        assert_eq!(settings.llm_provider, LlmProvider::OpenAi);
        assert!(!settings.llm_enabled);
        assert_eq!(settings.token.as_deref(), Some("ak-1:as-2"));
        assert_eq!(settings.llm_model(), "gpt-4");
    }

    #[test]
    fn test_from_env_invalid_memory() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = clean_env();
        guard.set("FC_MEMORY", "lots");

        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("FC_MEMORY"));
    }

    #[test]
    fn test_from_env_groq_key_fallback() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = clean_env();
        guard.set("GROQ_API_KEY", "gsk-test");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.llm_api_key.as_deref(), Some("gsk-test"));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"region": "ap-south", "memory": 512, "groq_api_key": "gsk-file",
                "modal_token_id": "id", "modal_token_secret": "secret"}}"#
        )
        .unwrap();

        let settings = Settings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.region, "ap-south");
        assert_eq!(settings.memory, 512);
        assert_eq!(settings.timeout, 60);
        assert_eq!(settings.llm_api_key.as_deref(), Some("gsk-file"));
        assert_eq!(settings.token.as_deref(), Some("id:secret"));
    }

    #[test]
    fn test_from_json_file_rejects_zero_cpu() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cpu": 0}}"#).unwrap();

        assert!(matches!(
            Settings::from_json_file(file.path()),
            Err(ConfigError::Invalid("cpu", _))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = Settings::new()
            .with_token("super-secret")
            .with_llm_api_key("gsk-secret");
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("gsk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_builder_chain() {
        let settings = Settings::new()
            .with_region("eu-central")
            .with_memory(4096)
            .with_timeout(120)
            .with_cpu(2)
            .with_llm_enabled(false)
            .with_app_name("billing")
            .with_state_ttl_secs(600);

        assert_eq!(settings.region, "eu-central");
        assert_eq!(settings.memory, 4096);
        assert_eq!(settings.timeout, 120);
        assert_eq!(settings.cpu, 2);
        assert!(!settings.llm_enabled);
        assert_eq!(settings.app_name, "billing");
        assert_eq!(settings.state_ttl(), Some(Duration::from_secs(600)));
    }
}
