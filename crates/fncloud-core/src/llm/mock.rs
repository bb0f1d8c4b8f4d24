// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripted language model for testing.
//!
//! Replies are consumed in order; once the script runs out every call fails
//! with [`LlmError::Unavailable`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{LanguageModel, LlmError};

/// Language model that replays a fixed script.
pub struct ScriptedLanguageModel {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    /// Optional delay before each reply (in milliseconds)
    pub response_delay_ms: u64,
}

impl Default for ScriptedLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLanguageModel {
    /// Create a model with an empty script.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            response_delay_ms: 0,
        }
    }

    /// Append a successful reply.
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.script.get_mut().push_back(Ok(response.into()));
        self
    }

    /// Append a failure.
    pub fn with_error(mut self, error: LlmError) -> Self {
        self.script.get_mut().push_back(Err(error));
        self
    }

    /// Delay every reply.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    /// Number of `complete` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(prompt.to_string());

        if self.response_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.response_delay_ms)).await;
        }

        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".to_string())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order() {
        let model = ScriptedLanguageModel::new()
            .with_error(LlmError::Transient("reset".to_string()))
            .with_response("{}");

        assert!(model.complete("a").await.unwrap_err().is_transient());
        assert_eq!(model.complete("b").await.unwrap(), "{}");
        assert!(matches!(
            model.complete("c").await,
            Err(LlmError::Unavailable(_))
        ));
        assert_eq!(model.call_count(), 3);
        assert_eq!(model.prompts().await, vec!["a", "b", "c"]);
    }
}
