// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! OpenAI-compatible chat-completions client (Groq, OpenAI).

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{LanguageModel, LlmError};
use crate::config::{LlmProvider, Settings};
use crate::error::{Error, Result};

/// Language model reached over HTTP.
pub struct HttpLanguageModel {
    client: reqwest::Client,
    provider: LlmProvider,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl HttpLanguageModel {
    /// Create a client for `provider`. `request_timeout` bounds one HTTP request.
    pub fn new(
        provider: LlmProvider,
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            provider,
            api_base: provider.api_base().to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Create a client from settings. Requires an API key.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.llm_api_key.clone().ok_or_else(|| {
            Error::Config(format!("{} API key is required", settings.llm_provider))
        })?;
        Self::new(
            settings.llm_provider,
            api_key,
            settings.llm_model(),
            settings.llm_timeout(),
        )
    }

    /// Point at a different OpenAI-compatible base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, LlmError> {
        debug!(provider = %self.provider, model = %self.model, prompt_len = prompt.len(), "Sending analysis prompt");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "temperature": 0,
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    LlmError::Transient(format!("{} request failed: {}", self.provider, e))
                } else {
                    LlmError::Unavailable(format!("{} request failed: {}", self.provider, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("{} API error {}: {}", self.provider, status, body);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                LlmError::Transient(message)
            } else {
                LlmError::Unavailable(message)
            });
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        data.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("No content in response".to_string()))
    }

    fn name(&self) -> &str {
        match self.provider {
            LlmProvider::Groq => "groq",
            LlmProvider::OpenAi => "openai",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_requires_key() {
        let settings = Settings::default();
        assert!(matches!(
            HttpLanguageModel::from_settings(&settings),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_settings_uses_provider_defaults() {
        let settings = Settings::default()
            .with_llm_provider(LlmProvider::OpenAi)
            .with_llm_api_key("sk-test");
        let model = HttpLanguageModel::from_settings(&settings).unwrap();
        assert_eq!(model.model, "gpt-4");
        assert_eq!(model.api_base, "https://api.openai.com/v1");
        assert_eq!(model.name(), "openai");

        let model = model.with_api_base("http://localhost:8080/v1/");
        assert_eq!(model.api_base, "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let model = HttpLanguageModel::new(
            LlmProvider::Groq,
            "gsk-test",
            "llama3-8b-8192",
            Duration::from_millis(500),
        )
        .unwrap()
        .with_api_base("http://127.0.0.1:9");

        let err = model.complete("hello").await.unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }
}
