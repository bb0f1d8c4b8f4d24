// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fallback dependency analysis.
//!
//! The prompt carries only the function source and the unresolved symbols,
//! both bounded. The answer must be a JSON object of the form
//!
//! ```json
//! {"packages": [{"name": "md-5", "version": "0.10"}], "system_packages": ["libssl-dev"]}
//! ```
//!
//! Any entry that fails validation rejects the whole answer.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{LanguageModel, LlmError};
use crate::dependency::{DependencySet, DependencySource, Requirement};
use crate::error::{Error, Result};

/// Source bytes included in a prompt.
pub const MAX_PROMPT_SOURCE_BYTES: usize = 8 * 1024;
/// Unresolved symbols included in a prompt.
pub const MAX_PROMPT_SYMBOLS: usize = 64;
/// Characters kept per symbol.
pub const MAX_SYMBOL_CHARS: usize = 128;

// Patterns are literals; `None` would fail every match closed
static PACKAGE_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,63}$").ok());

static SYSTEM_PACKAGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9+.-]{0,63}$").ok());

static VERSION_COMPARATOR: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(=|\^|~|>=|<=|>|<)?\s*\d+(\.(\d+|\*))?(\.(\d+|\*))?(-[0-9A-Za-z.-]+)?$").ok()
});

fn is_match(pattern: &LazyLock<Option<Regex>>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(value))
}

const STD_CRATES: &[&str] = &["std", "core", "alloc", "proc_macro", "test"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnalysisAnswer {
    packages: Vec<AnalysisPackage>,
    #[serde(default)]
    system_packages: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnalysisPackage {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

/// Asks a [`LanguageModel`] about symbols static analysis could not place.
#[derive(Clone)]
pub struct FallbackAnalyzer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl FallbackAnalyzer {
    /// `timeout` bounds the whole analysis, retry included.
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Analyze `source` for `unresolved` symbols. Every returned requirement
    /// is tagged [`DependencySource::Llm`].
    ///
    /// Retries once on a transient failure. Parse and validation failures are
    /// never retried.
    pub async fn analyze(&self, source: &str, unresolved: &[String]) -> Result<DependencySet> {
        let prompt = build_prompt(source, unresolved);
        info!(
            model = %self.model.name(),
            symbols = unresolved.len(),
            "Running fallback dependency analysis"
        );

        let exchange = async {
            match self.model.complete(&prompt).await {
                Err(LlmError::Transient(cause)) => {
                    warn!(error = %cause, "Transient analysis failure, retrying once");
                    self.model.complete(&prompt).await
                }
                other => other,
            }
        };

        let answer = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::timeout("dependency analysis", self.timeout))?
            .map_err(|e| match e {
                LlmError::Transient(cause) | LlmError::Unavailable(cause) => {
                    Error::AnalysisUnavailable(cause)
                }
                LlmError::InvalidResponse(cause) => Error::AnalysisInvalid(cause),
            })?;

        parse_answer(&answer)
    }
}

/// Build the bounded prompt. Nothing but the source and the symbols goes in.
pub(crate) fn build_prompt(source: &str, unresolved: &[String]) -> String {
    let source = truncate_at_char_boundary(source, MAX_PROMPT_SOURCE_BYTES);
    let symbols: Vec<String> = unresolved
        .iter()
        .take(MAX_PROMPT_SYMBOLS)
        .map(|s| {
            s.chars()
                .filter(|c| !c.is_control())
                .take(MAX_SYMBOL_CHARS)
                .collect()
        })
        .collect();

    format!(
        "You are analyzing a Rust function to find the crates it needs to compile and run.\n\
         Static analysis could not resolve these symbols: {}\n\n\
         Function source:\n```rust\n{}\n```\n\n\
         Reply with only a JSON object of the form \
         {{\"packages\": [{{\"name\": \"<crate name>\", \"version\": \"<cargo version requirement>\"}}], \
         \"system_packages\": [\"<debian package>\"]}}. \
         Do not list standard library crates.",
        symbols.join(", "),
        source
    )
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Strict parse of a model answer.
pub(crate) fn parse_answer(answer: &str) -> Result<DependencySet> {
    let (Some(start), Some(end)) = (answer.find('{'), answer.rfind('}')) else {
        return Err(Error::AnalysisInvalid("no JSON object in response".to_string()));
    };
    if end < start {
        return Err(Error::AnalysisInvalid("no JSON object in response".to_string()));
    }

    let parsed: AnalysisAnswer = serde_json::from_str(&answer[start..=end])
        .map_err(|e| Error::AnalysisInvalid(format!("response does not match schema: {}", e)))?;

    let mut set = DependencySet::new();
    for package in parsed.packages {
        let name = package.name.trim();
        if !is_match(&PACKAGE_NAME, name) {
            return Err(Error::AnalysisInvalid(format!(
                "unsafe package name {:?}",
                package.name
            )));
        }
        if STD_CRATES.contains(&name) {
            debug!(package = %name, "Dropping standard library crate from analysis");
            continue;
        }

        let mut requirement = Requirement::new(name).with_source(DependencySource::Llm);
        match package.version.as_deref().map(str::trim) {
            None | Some("") => {}
            Some(version) if is_version_requirement(version) => {
                requirement = requirement.with_constraint(version);
            }
            Some(version) => {
                return Err(Error::AnalysisInvalid(format!(
                    "invalid version requirement {:?} for {}",
                    version, name
                )));
            }
        }
        set.insert(requirement);
    }

    for package in parsed.system_packages {
        let package = package.trim();
        if !is_match(&SYSTEM_PACKAGE, package) {
            return Err(Error::AnalysisInvalid(format!(
                "unsafe system package {:?}",
                package
            )));
        }
        set.add_system_package(package);
    }

    Ok(set)
}

/// Cargo version requirement: `*` or comma-separated comparators.
fn is_version_requirement(version: &str) -> bool {
    version == "*"
        || version
            .split(',')
            .all(|comparator| is_match(&VERSION_COMPARATOR, comparator.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer_with_surrounding_prose() {
        let set = parse_answer(
            "Sure! Here you go:\n{\"packages\": [{\"name\": \"md-5\", \"version\": \"0.10\"}]}\nHope this helps.",
        )
        .unwrap();
        let md5 = set.get("md-5").unwrap();
        assert_eq!(md5.constraint.as_deref(), Some("0.10"));
        assert_eq!(md5.source, Some(DependencySource::Llm));
    }

    #[test]
    fn test_parse_answer_rejects_unsafe_names() {
        for name in ["../etc", "pkg; rm -rf /", "1abc", ""] {
            let answer = format!("{{\"packages\": [{{\"name\": {:?}}}]}}", name);
            assert!(
                matches!(parse_answer(&answer), Err(Error::AnalysisInvalid(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_answer_rejects_unknown_fields() {
        let answer = r#"{"packages": [], "install_script": "curl | sh"}"#;
        assert!(matches!(parse_answer(answer), Err(Error::AnalysisInvalid(_))));
    }

    #[test]
    fn test_parse_answer_validates_versions() {
        assert!(parse_answer(r#"{"packages": [{"name": "rand", "version": ">=0.8, <0.9"}]}"#).is_ok());
        assert!(parse_answer(r#"{"packages": [{"name": "rand", "version": "*"}]}"#).is_ok());
        assert!(parse_answer(r#"{"packages": [{"name": "rand", "version": "~1.2.*"}]}"#).is_ok());
        assert!(matches!(
            parse_answer(r#"{"packages": [{"name": "rand", "version": "latest"}]}"#),
            Err(Error::AnalysisInvalid(_))
        ));
    }

    #[test]
    fn test_parse_answer_drops_std_and_keeps_system_packages() {
        let set = parse_answer(
            r#"{"packages": [{"name": "std"}, {"name": "openssl", "version": "0.10"}],
                "system_packages": ["libssl-dev"]}"#,
        )
        .unwrap();
        assert!(set.get("std").is_none());
        assert!(set.get("openssl").is_some());
        assert_eq!(set.system_packages(), &["libssl-dev".to_string()]);
    }

    #[test]
    fn test_parse_answer_without_json() {
        assert!(matches!(
            parse_answer("I cannot help with that"),
            Err(Error::AnalysisInvalid(_))
        ));
        assert!(matches!(
            parse_answer("} backwards {"),
            Err(Error::AnalysisInvalid(_))
        ));
    }

    #[test]
    fn test_prompt_is_bounded() {
        let source = "é".repeat(MAX_PROMPT_SOURCE_BYTES);
        let symbols: Vec<String> = (0..200).map(|i| format!("sym{}{}", i, "x".repeat(300))).collect();
        let prompt = build_prompt(&source, &symbols);

        assert!(prompt.len() < MAX_PROMPT_SOURCE_BYTES + MAX_PROMPT_SYMBOLS * (MAX_SYMBOL_CHARS + 2) + 1024);
        assert!(prompt.contains("sym63"));
        assert!(!prompt.contains("sym64"));
    }
}
