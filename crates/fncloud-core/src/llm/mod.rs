// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Language-model fallback for dependency analysis.
//!
//! Only consulted when static resolution cannot decide. The [`LanguageModel`]
//! trait is the seam to the external service; [`FallbackAnalyzer`] owns the
//! prompt, the retry policy and the strict response parsing.

mod analyzer;
mod http;
mod mock;

pub use analyzer::{FallbackAnalyzer, MAX_PROMPT_SOURCE_BYTES, MAX_PROMPT_SYMBOLS, MAX_SYMBOL_CHARS};
pub use http::HttpLanguageModel;
pub use mock::ScriptedLanguageModel;

use async_trait::async_trait;

/// Failure talking to the language-model service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    /// Network hiccup, rate limit or 5xx. Worth one retry.
    #[error("transient language-model failure: {0}")]
    Transient(String),

    /// The service cannot be used (bad credentials, 4xx, no endpoint).
    #[error("language model unavailable: {0}")]
    Unavailable(String),

    /// The service answered but the envelope was not understood.
    #[error("invalid language-model response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

/// Single-shot prompt/response service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send one prompt and return the raw text answer.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}
