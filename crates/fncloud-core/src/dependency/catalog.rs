// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Curated crate-root → package lookup table.

use std::collections::HashMap;

use super::Requirement;

/// Maps the root name used in source (`serde_json`) to the package(s) that
/// provide it. More than one candidate means the name is ambiguous.
#[derive(Debug, Clone, Default)]
pub struct PackageCatalog {
    entries: HashMap<String, Vec<Requirement>>,
}

/// (root, package, constraint)
const BUILTIN: &[(&str, &str, &str)] = &[
    ("anyhow", "anyhow", "1"),
    ("async_trait", "async-trait", "0.1"),
    ("base64", "base64", "0.22"),
    ("bytes", "bytes", "1"),
    ("chrono", "chrono", "0.4"),
    ("clap", "clap", "4"),
    ("csv", "csv", "1"),
    ("futures", "futures", "0.3"),
    ("hex", "hex", "0.4"),
    ("hmac", "hmac", "0.12"),
    ("itertools", "itertools", "0.13"),
    ("log", "log", "0.4"),
    ("once_cell", "once_cell", "1"),
    ("rand", "rand", "0.8"),
    ("rayon", "rayon", "1"),
    ("regex", "regex", "1"),
    ("reqwest", "reqwest", "0.12"),
    ("serde", "serde", "1"),
    ("serde_json", "serde_json", "1"),
    ("serde_yaml", "serde_yaml", "0.9"),
    ("sha2", "sha2", "0.10"),
    ("thiserror", "thiserror", "2"),
    ("tokio", "tokio", "1"),
    ("tokio_util", "tokio-util", "0.7"),
    ("toml", "toml", "0.8"),
    ("tracing", "tracing", "0.1"),
    ("url", "url", "2"),
    ("uuid", "uuid", "1"),
    // Same root name published by more than one crate
    ("md5", "md5", "0.7"),
    ("md5", "md-5", "0.10"),
    ("sha1", "sha1", "0.10"),
    ("sha1", "sha-1", "0.10"),
];

impl PackageCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with common crates.
    pub fn builtin() -> Self {
        BUILTIN
            .iter()
            .fold(Self::new(), |catalog, (root, package, constraint)| {
                catalog.with_entry(root, Requirement::new(*package).with_constraint(*constraint))
            })
    }

    /// Add a candidate for `root`. Adding a second distinct package makes
    /// the root ambiguous.
    pub fn with_entry(mut self, root: &str, requirement: Requirement) -> Self {
        let candidates = self.entries.entry(root.to_string()).or_default();
        if !candidates.iter().any(|c| c.key() == requirement.key()) {
            candidates.push(requirement);
        }
        self
    }

    /// Candidates for a root name, if any.
    pub fn lookup(&self, root: &str) -> Option<&[Requirement]> {
        self.entries.get(root).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
