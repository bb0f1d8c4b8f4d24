// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the language-model fallback analyzer.

use std::sync::Arc;
use std::time::Duration;

use fncloud_core::llm::{FallbackAnalyzer, LlmError, MAX_PROMPT_SOURCE_BYTES, ScriptedLanguageModel};
use fncloud_core::{DependencySource, Error};

const SOURCE: &str = "fn digest(b: &[u8]) -> String { format!(\"{:x}\", md5::compute(b)) }";

const ANSWER: &str = r#"{"packages": [{"name": "md5", "version": "0.7"}], "system_packages": ["libssl-dev"]}"#;

fn analyzer(model: &Arc<ScriptedLanguageModel>) -> FallbackAnalyzer {
    FallbackAnalyzer::new(model.clone(), Duration::from_secs(5))
}

fn symbols() -> Vec<String> {
    vec!["md5".to_string()]
}

#[tokio::test]
async fn test_answer_is_tagged_llm() {
    let model = Arc::new(ScriptedLanguageModel::new().with_response(ANSWER));

    let set = analyzer(&model).analyze(SOURCE, &symbols()).await.unwrap();

    let md5 = set.get("md5").unwrap();
    assert_eq!(md5.constraint.as_deref(), Some("0.7"));
    assert_eq!(md5.source, Some(DependencySource::Llm));
    assert_eq!(set.system_packages(), &["libssl-dev".to_string()]);
}

#[tokio::test]
async fn test_prompt_carries_only_source_and_symbols() {
    let model = Arc::new(ScriptedLanguageModel::new().with_response(ANSWER));
    analyzer(&model).analyze(SOURCE, &symbols()).await.unwrap();

    let prompts = model.prompts().await;
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("md5::compute"));
    assert!(prompts[0].contains("md5"));
}

#[tokio::test]
async fn test_prompt_is_bounded() {
    let model = Arc::new(ScriptedLanguageModel::new().with_response(ANSWER));
    let huge = format!("fn f() {{ {} }}", "é".repeat(MAX_PROMPT_SOURCE_BYTES));

    analyzer(&model).analyze(&huge, &symbols()).await.unwrap();

    let prompt = &model.prompts().await[0];
    assert!(prompt.len() < MAX_PROMPT_SOURCE_BYTES + 1024);
}

#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let model = Arc::new(
        ScriptedLanguageModel::new()
            .with_error(LlmError::Transient("connection reset".to_string()))
            .with_response(ANSWER),
    );

    let set = analyzer(&model).analyze(SOURCE, &symbols()).await.unwrap();

    assert_eq!(model.call_count(), 2);
    assert!(set.get("md5").is_some());
}

#[tokio::test]
async fn test_second_transient_failure_is_unavailable() {
    let model = Arc::new(
        ScriptedLanguageModel::new()
            .with_error(LlmError::Transient("reset".to_string()))
            .with_error(LlmError::Transient("reset again".to_string()))
            .with_response(ANSWER),
    );

    let result = analyzer(&model).analyze(SOURCE, &symbols()).await;

    assert_eq!(
        result.unwrap_err(),
        Error::AnalysisUnavailable("reset again".to_string())
    );
    assert_eq!(model.call_count(), 2);
}

#[tokio::test]
async fn test_unavailable_is_not_retried() {
    let model = Arc::new(
        ScriptedLanguageModel::new().with_error(LlmError::Unavailable("401 Unauthorized".to_string())),
    );

    let result = analyzer(&model).analyze(SOURCE, &symbols()).await;

    assert!(matches!(result, Err(Error::AnalysisUnavailable(_))));
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_invalid_answer_is_not_retried() {
    let model = Arc::new(
        ScriptedLanguageModel::new()
            .with_response(r#"{"packages": [{"name": "evil; rm -rf /"}]}"#)
            .with_response(ANSWER),
    );

    let result = analyzer(&model).analyze(SOURCE, &symbols()).await;

    assert!(matches!(result, Err(Error::AnalysisInvalid(_))));
    assert_eq!(model.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_model_times_out() {
    let model = Arc::new(
        ScriptedLanguageModel::new()
            .with_response(ANSWER)
            .with_delay_ms(10_000),
    );
    let analyzer = FallbackAnalyzer::new(model.clone(), Duration::from_millis(500));

    let result = analyzer.analyze(SOURCE, &symbols()).await;

    assert_eq!(
        result.unwrap_err(),
        Error::timeout("dependency analysis", Duration::from_millis(500))
    );
}
