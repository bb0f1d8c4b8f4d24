// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dependency sets and static resolution.
//!
//! A [`DependencySet`] is what a function needs to run remotely: installable
//! package requirements, local modules that must be bundled with the callable,
//! and optional system packages. Requirements are kept sorted and unique by
//! normalised package name.

mod catalog;
mod resolver;

pub use catalog::PackageCatalog;
pub use resolver::{DependencyResolver, Resolution};

use serde::{Deserialize, Serialize};

/// Where a requirement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencySource {
    /// Static code inspection
    Static,
    /// Language-model fallback analysis
    Llm,
}

impl std::fmt::Display for DependencySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencySource::Static => write!(f, "static"),
            DependencySource::Llm => write!(f, "llm"),
        }
    }
}

/// One installable package with an optional version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requirement {
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DependencySource>,
}

impl Requirement {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            constraint: None,
            source: None,
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn with_source(mut self, source: DependencySource) -> Self {
        self.source = Some(source);
        self
    }

    /// Key used for de-duplication (`serde_json` and `serde-json` collide).
    pub fn key(&self) -> String {
        normalize_package(&self.package)
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.constraint {
            Some(constraint) => write!(f, "{} = \"{}\"", self.package, constraint),
            None => write!(f, "{} = \"*\"", self.package),
        }
    }
}

/// Normalise a package name for comparison.
pub fn normalize_package(name: &str) -> String {
    name.trim().to_lowercase().replace('_', "-")
}

/// Ordered, de-duplicated dependency set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySet {
    requirements: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    bundled: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    system_packages: Vec<String>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a requirement, keeping the set sorted and unique.
    ///
    /// On a clash with an existing entry for the same package:
    /// - a static entry always beats an LLM entry,
    /// - between entries of the same source the existing one is kept, except
    ///   that a constraint fills in a missing one.
    pub fn insert(&mut self, requirement: Requirement) {
        let key = requirement.key();
        match self
            .requirements
            .binary_search_by(|existing| existing.key().cmp(&key))
        {
            Ok(index) => {
                let existing = &mut self.requirements[index];
                let incoming_wins = match (existing.source, requirement.source) {
                    (Some(DependencySource::Llm), Some(DependencySource::Static)) => true,
                    (Some(DependencySource::Static), Some(DependencySource::Llm)) => false,
                    _ => existing.constraint.is_none() && requirement.constraint.is_some(),
                };
                if incoming_wins {
                    *existing = requirement;
                }
            }
            Err(index) => self.requirements.insert(index, requirement),
        }
    }

    /// Record a local module that must ship with the callable.
    pub fn add_bundled(&mut self, module: impl Into<String>) {
        insert_sorted(&mut self.bundled, module.into());
    }

    /// Record a system package the function needs at runtime.
    pub fn add_system_package(&mut self, package: impl Into<String>) {
        insert_sorted(&mut self.system_packages, package.into());
    }

    /// Merge `other` into `self`. Static entries win on conflict regardless of
    /// which side they are on.
    pub fn merge(mut self, other: DependencySet) -> Self {
        for requirement in other.requirements {
            self.insert(requirement);
        }
        for module in other.bundled {
            self.add_bundled(module);
        }
        for package in other.system_packages {
            self.add_system_package(package);
        }
        self
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn bundled(&self) -> &[String] {
        &self.bundled
    }

    pub fn system_packages(&self) -> &[String] {
        &self.system_packages
    }

    /// Find the requirement for a package by normalised name.
    pub fn get(&self, package: &str) -> Option<&Requirement> {
        let key = normalize_package(package);
        self.requirements
            .binary_search_by(|existing| existing.key().cmp(&key))
            .ok()
            .map(|index| &self.requirements[index])
    }

    /// True when nothing needs installing or bundling.
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty() && self.bundled.is_empty() && self.system_packages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }
}

impl FromIterator<Requirement> for DependencySet {
    fn from_iter<I: IntoIterator<Item = Requirement>>(iter: I) -> Self {
        let mut set = DependencySet::new();
        for requirement in iter {
            set.insert(requirement);
        }
        set
    }
}

fn insert_sorted(list: &mut Vec<String>, value: String) {
    if let Err(index) = list.binary_search(&value) {
        list.insert(index, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(name: &str, constraint: &str) -> Requirement {
        Requirement::new(name)
            .with_constraint(constraint)
            .with_source(DependencySource::Static)
    }

    fn llm(name: &str, constraint: &str) -> Requirement {
        Requirement::new(name)
            .with_constraint(constraint)
            .with_source(DependencySource::Llm)
    }

    #[test]
    fn test_sorted_and_unique() {
        let set: DependencySet = vec![stat("tokio", "1"), stat("anyhow", "1"), stat("tokio", "1")]
            .into_iter()
            .collect();
        let names: Vec<_> = set.requirements().iter().map(|r| r.package.as_str()).collect();
        assert_eq!(names, vec!["anyhow", "tokio"]);
    }

    #[test]
    fn test_static_beats_llm_in_both_orders() {
        let statics: DependencySet = vec![stat("reqwest", ">=2.0")].into_iter().collect();
        let llms: DependencySet = vec![llm("reqwest", "=1.0")].into_iter().collect();

        let merged = statics.clone().merge(llms.clone());
        assert_eq!(merged.get("reqwest").unwrap().constraint.as_deref(), Some(">=2.0"));

        let merged = llms.merge(statics);
        let winner = merged.get("reqwest").unwrap();
        assert_eq!(winner.constraint.as_deref(), Some(">=2.0"));
        assert_eq!(winner.source, Some(DependencySource::Static));
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_underscore_and_dash_collide() {
        let mut set = DependencySet::new();
        set.insert(stat("serde_json", "1"));
        set.insert(llm("serde-json", "0.9"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("serde-json").unwrap().package, "serde_json");
    }

    #[test]
    fn test_constraint_fills_missing() {
        let mut set = DependencySet::new();
        set.insert(Requirement::new("regex").with_source(DependencySource::Llm));
        set.insert(llm("regex", "1"));
        assert_eq!(set.get("regex").unwrap().constraint.as_deref(), Some("1"));
    }

    #[test]
    fn test_bundled_and_system_packages() {
        let mut set = DependencySet::new();
        assert!(set.is_empty());
        set.add_bundled("crate::helpers");
        set.add_bundled("crate::helpers");
        set.add_system_package("libssl-dev");
        assert_eq!(set.bundled(), &["crate::helpers".to_string()]);
        assert_eq!(set.system_packages(), &["libssl-dev".to_string()]);
        assert!(!set.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_requirement_display() {
        assert_eq!(stat("tokio", "1.40").to_string(), "tokio = \"1.40\"");
        assert_eq!(Requirement::new("rand").to_string(), "rand = \"*\"");
    }
}
