// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Static dependency resolution.
//!
//! The function source is parsed with `syn` and walked twice: first to collect
//! names declared inside it (generic parameters, nested items, `use` aliases,
//! parameter and `let` bindings), then to collect the root segment of every
//! external path, `use` tree, `extern crate` and macro invocation. Each root is
//! classified as standard library, local (bundled), catalog package, or
//! unresolved.
//!
//! Bare names in type, callee or struct-literal position (`Value`,
//! `to_string(..)`) that are neither declared in the source nor part of the
//! prelude were brought in by a `use` outside the captured text. They cannot
//! be mapped to a package and are reported as unresolved.

use std::collections::BTreeSet;

use syn::punctuated::Punctuated;
use syn::visit::{self, Visit};
use syn::{Expr, Token, UseTree};
use tracing::debug;

use super::{DependencySet, DependencySource, PackageCatalog};
use crate::error::{Error, Result};

/// Outcome of static resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every external reference resolved unambiguously.
    Resolved(DependencySet),
    /// Some references could not be resolved without guessing.
    NeedsLlmFallback {
        /// What static analysis did resolve
        partial: DependencySet,
        /// Sorted, de-duplicated symbols the fallback must explain
        unresolved: Vec<String>,
    },
}

const STD_ROOTS: &[&str] = &["std", "core", "alloc", "proc_macro", "test"];

const LOCAL_ROOTS: &[&str] = &["crate", "self", "super"];

/// Prelude items and primitives that may appear as path roots (`String::new`).
const PRELUDE: &[&str] = &[
    "Self", "String", "Vec", "Option", "Some", "None", "Result", "Ok", "Err", "Box",
    "ToString", "ToOwned", "Default", "Iterator", "IntoIterator", "DoubleEndedIterator",
    "ExactSizeIterator", "Extend", "From", "Into", "TryFrom", "TryInto", "FromIterator",
    "Clone", "Copy", "Send", "Sync", "Sized", "Unpin", "Drop", "Fn", "FnMut", "FnOnce",
    "AsRef", "AsMut", "PartialEq", "Eq", "PartialOrd", "Ord", "bool", "char", "str", "i8",
    "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64", "u128", "usize", "f32",
    "f64", "drop",
];

/// Built-in and standard-library macros.
const STD_MACROS: &[&str] = &[
    "assert", "assert_eq", "assert_ne", "cfg", "column", "compile_error", "concat", "dbg",
    "debug_assert", "debug_assert_eq", "debug_assert_ne", "env", "eprint", "eprintln", "file",
    "format", "format_args", "line", "matches", "module_path", "option_env", "panic", "print",
    "println", "stringify", "todo", "unimplemented", "unreachable", "vec", "write", "writeln",
];

/// Macros that pull in source or data at compile time.
const DYNAMIC_MACROS: &[&str] = &["include", "include_str", "include_bytes"];

/// Resolves a function's external references against a [`PackageCatalog`].
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    catalog: PackageCatalog,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new(PackageCatalog::builtin())
    }
}

impl DependencyResolver {
    pub fn new(catalog: PackageCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &PackageCatalog {
        &self.catalog
    }

    /// Resolve `source` plus `declared_imports`.
    ///
    /// Declared imports may be a bare path (`"serde_json"`,
    /// `"crate::helpers"`) or a `use` item (`"use regex::Regex;"`).
    ///
    /// Unparseable source is an error; it is never treated as "no
    /// dependencies".
    pub fn resolve(&self, source: &str, declared_imports: &[String]) -> Result<Resolution> {
        let file = syn::parse_file(source)
            .map_err(|e| Error::Resolution(format!("cannot parse function source: {}", e)))?;

        let imports = declared_imports
            .iter()
            .map(|import| import.trim())
            .filter(|import| !import.is_empty())
            .map(parse_import)
            .collect::<Result<Vec<_>>>()?;

        let mut declared = DeclaredNames::default();
        declared.visit_file(&file);
        for import in &imports {
            match import {
                Import::Use(item) => declared.visit_item_use(item),
                Import::Path(path) => declared.declare_local_import(path),
            }
        }

        let mut refs = References {
            declared: &declared,
            roots: BTreeSet::new(),
            bare: BTreeSet::new(),
            dynamic: BTreeSet::new(),
        };
        refs.visit_file(&file);
        for import in &imports {
            match import {
                Import::Use(item) => refs.visit_item_use(item),
                Import::Path(path) => refs.record_path(path, true),
            }
        }

        let mut set = DependencySet::new();
        let mut unresolved: BTreeSet<String> = refs.dynamic;
        for name in refs.bare {
            debug!(symbol = %name, "Bare name not declared in source");
            unresolved.insert(name);
        }

        for root in &refs.roots {
            match root {
                Root::Local(module) => set.add_bundled(module.clone()),
                Root::External(name) => {
                    if STD_ROOTS.contains(&name.as_str()) || PRELUDE.contains(&name.as_str()) {
                        continue;
                    }
                    match self.catalog.lookup(name) {
                        Some([requirement]) => {
                            set.insert(requirement.clone().with_source(DependencySource::Static));
                        }
                        Some(candidates) => {
                            debug!(
                                symbol = %name,
                                candidates = candidates.len(),
                                "Ambiguous crate root"
                            );
                            unresolved.insert(name.clone());
                        }
                        None => {
                            unresolved.insert(name.clone());
                        }
                    }
                }
            }
        }

        if unresolved.is_empty() {
            debug!(
                requirements = set.len(),
                bundled = set.bundled().len(),
                "Static resolution complete"
            );
            Ok(Resolution::Resolved(set))
        } else {
            debug!(
                requirements = set.len(),
                unresolved = unresolved.len(),
                "Static resolution needs fallback"
            );
            Ok(Resolution::NeedsLlmFallback {
                partial: set,
                unresolved: unresolved.into_iter().collect(),
            })
        }
    }
}

enum Import {
    Use(syn::ItemUse),
    Path(syn::Path),
}

fn parse_import(import: &str) -> Result<Import> {
    let invalid =
        |e: syn::Error| Error::Resolution(format!("invalid declared import `{}`: {}", import, e));
    if import.starts_with("use ") || import.starts_with("pub use ") {
        syn::parse_str(import).map(Import::Use).map_err(invalid)
    } else {
        syn::parse_str(import).map(Import::Path).map_err(invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Root {
    /// `crate::x`, `self::x`, `super::x` (recorded with the next segment)
    Local(String),
    External(String),
}

/// First pass: names introduced inside the source.
#[derive(Default)]
struct DeclaredNames {
    names: BTreeSet<String>,
    /// Name of the outermost function (recursive calls)
    own: Option<String>,
    depth: usize,
}

impl DeclaredNames {
    fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// `crate::helpers::Shape` declares `Shape` as local code.
    fn declare_local_import(&mut self, path: &syn::Path) {
        let Some(first) = path.segments.first() else {
            return;
        };
        if path.segments.len() < 2 || !LOCAL_ROOTS.contains(&first.ident.to_string().as_str()) {
            return;
        }
        if let Some(last) = path.segments.last() {
            self.names.insert(last.ident.to_string());
        }
    }
}

impl<'ast> Visit<'ast> for DeclaredNames {
    fn visit_pat_ident(&mut self, pat: &'ast syn::PatIdent) {
        self.names.insert(pat.ident.to_string());
        visit::visit_pat_ident(self, pat);
    }

    fn visit_generic_param(&mut self, param: &'ast syn::GenericParam) {
        if let syn::GenericParam::Type(ty) = param {
            self.names.insert(ty.ident.to_string());
        }
        visit::visit_generic_param(self, param);
    }

    fn visit_item(&mut self, item: &'ast syn::Item) {
        // Items nested inside the function body; the outermost item is the function itself
        if self.depth > 0 {
            let ident = match item {
                syn::Item::Const(i) => Some(&i.ident),
                syn::Item::Enum(i) => Some(&i.ident),
                syn::Item::Fn(i) => Some(&i.sig.ident),
                syn::Item::Mod(i) => Some(&i.ident),
                syn::Item::Static(i) => Some(&i.ident),
                syn::Item::Struct(i) => Some(&i.ident),
                syn::Item::Trait(i) => Some(&i.ident),
                syn::Item::Type(i) => Some(&i.ident),
                syn::Item::Union(i) => Some(&i.ident),
                _ => None,
            };
            if let Some(ident) = ident {
                self.names.insert(ident.to_string());
            }
        } else if let syn::Item::Fn(function) = item {
            self.own = Some(function.sig.ident.to_string());
        }
        self.depth += 1;
        visit::visit_item(self, item);
        self.depth -= 1;
    }

    fn visit_use_tree(&mut self, tree: &'ast UseTree) {
        match tree {
            UseTree::Name(name) if name.ident != "self" => {
                self.names.insert(name.ident.to_string());
            }
            UseTree::Rename(rename) => {
                self.names.insert(rename.rename.to_string());
            }
            _ => {}
        }
        visit::visit_use_tree(self, tree);
    }
}

/// Second pass: external roots.
struct References<'a> {
    declared: &'a DeclaredNames,
    roots: BTreeSet<Root>,
    /// Undeclared single-segment names
    bare: BTreeSet<String>,
    dynamic: BTreeSet<String>,
}

impl References<'_> {
    /// Record the root of a path. Single-segment paths are locals unless they
    /// come from a declared import.
    fn record_path(&mut self, path: &syn::Path, always: bool) {
        let Some(first) = path.segments.first() else {
            return;
        };
        if path.segments.len() < 2 && path.leading_colon.is_none() && !always {
            return;
        }
        let root = first.ident.to_string();
        self.record_root(&root, path.segments.iter().nth(1).map(|s| s.ident.to_string()));
    }

    /// Record a single-segment name used as a type, callee or struct literal.
    fn record_bare(&mut self, path: &syn::Path) {
        if path.leading_colon.is_some() || path.segments.len() != 1 {
            return;
        }
        let name = path.segments[0].ident.to_string();
        if PRELUDE.contains(&name.as_str())
            || LOCAL_ROOTS.contains(&name.as_str())
            || self.declared.contains(&name)
            || self.declared.own.as_deref() == Some(name.as_str())
        {
            return;
        }
        self.bare.insert(name);
    }

    fn record_root(&mut self, root: &str, next: Option<String>) {
        if LOCAL_ROOTS.contains(&root) {
            let module = match next {
                Some(next) => format!("{}::{}", root, next),
                None => root.to_string(),
            };
            self.roots.insert(Root::Local(module));
        } else if !self.declared.contains(root) {
            self.roots.insert(Root::External(root.to_string()));
        }
    }

    fn record_use_tree(&mut self, tree: &UseTree) {
        match tree {
            UseTree::Path(path) => {
                let next = match &*path.tree {
                    UseTree::Path(p) => Some(p.ident.to_string()),
                    UseTree::Name(n) => Some(n.ident.to_string()),
                    UseTree::Rename(r) => Some(r.ident.to_string()),
                    _ => None,
                };
                self.record_root_unfiltered(&path.ident.to_string(), next);
            }
            UseTree::Name(name) => self.record_root_unfiltered(&name.ident.to_string(), None),
            UseTree::Rename(rename) => {
                self.record_root_unfiltered(&rename.ident.to_string(), None)
            }
            UseTree::Group(group) => {
                for item in &group.items {
                    self.record_use_tree(item);
                }
            }
            UseTree::Glob(_) => {}
        }
    }

    /// `use` roots are external even when the imported leaf shares the name.
    fn record_root_unfiltered(&mut self, root: &str, next: Option<String>) {
        if LOCAL_ROOTS.contains(&root) {
            self.record_root(root, next);
        } else {
            self.roots.insert(Root::External(root.to_string()));
        }
    }
}

impl<'ast> Visit<'ast> for References<'_> {
    fn visit_path(&mut self, path: &'ast syn::Path) {
        self.record_path(path, false);
        visit::visit_path(self, path);
    }

    fn visit_type_path(&mut self, ty: &'ast syn::TypePath) {
        if ty.qself.is_none() {
            self.record_bare(&ty.path);
        }
        visit::visit_type_path(self, ty);
    }

    fn visit_expr_call(&mut self, call: &'ast syn::ExprCall) {
        if let Expr::Path(callee) = &*call.func
            && callee.qself.is_none()
        {
            self.record_bare(&callee.path);
        }
        visit::visit_expr_call(self, call);
    }

    fn visit_expr_struct(&mut self, expr: &'ast syn::ExprStruct) {
        if expr.qself.is_none() {
            self.record_bare(&expr.path);
        }
        visit::visit_expr_struct(self, expr);
    }

    fn visit_item_use(&mut self, item: &'ast syn::ItemUse) {
        self.record_use_tree(&item.tree);
    }

    fn visit_item_extern_crate(&mut self, item: &'ast syn::ItemExternCrate) {
        if item.ident != "self" {
            self.roots.insert(Root::External(item.ident.to_string()));
        }
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        if mac.path.segments.len() == 1 && mac.path.leading_colon.is_none() {
            let name = mac.path.segments[0].ident.to_string();
            // Unknown bare macros come from an import we cannot see
            let known = STD_MACROS.contains(&name.as_str()) || self.declared.contains(&name);
            if DYNAMIC_MACROS.contains(&name.as_str()) || !known {
                self.dynamic.insert(format!("{}!", name));
            }
        } else {
            self.record_path(&mac.path, false);
        }

        // Paths inside macro bodies that read as expressions
        if let Ok(args) = mac.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated) {
            for expr in &args {
                self.visit_expr(expr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(source: &str) -> Resolution {
        DependencyResolver::default().resolve(source, &[]).unwrap()
    }

    #[test]
    fn test_std_only_source_is_empty() {
        let resolution = resolve(
            r#"fn count(words: Vec<String>) -> usize {
                let mut seen = std::collections::HashSet::new();
                for w in words { seen.insert(w); }
                println!("{}", seen.len());
                String::new().len() + seen.len()
            }"#,
        );
        assert_eq!(resolution, Resolution::Resolved(DependencySet::new()));
    }

    #[test]
    fn test_catalog_roots_resolve_statically() {
        let resolution = resolve(
            r#"fn encode(v: &serde_json::Value) -> String {
                use base64::Engine;
                let raw = serde_json::to_string(v).unwrap_or_default();
                base64::engine::general_purpose::STANDARD.encode(raw)
            }"#,
        );
        let Resolution::Resolved(set) = resolution else {
            panic!("expected static resolution");
        };
        let names: Vec<_> = set.requirements().iter().map(|r| r.package.as_str()).collect();
        assert_eq!(names, vec!["base64", "serde_json"]);
        assert!(
            set.requirements()
                .iter()
                .all(|r| r.source == Some(DependencySource::Static))
        );
    }

    #[test]
    fn test_ambiguous_root_needs_fallback() {
        let resolution = resolve("fn digest(b: &[u8]) -> String { format!(\"{:x}\", md5::compute(b)) }");
        assert_eq!(
            resolution,
            Resolution::NeedsLlmFallback {
                partial: DependencySet::new(),
                unresolved: vec!["md5".to_string()],
            }
        );
    }

    #[test]
    fn test_unknown_root_is_never_guessed() {
        let resolution = resolve("fn pad(s: &str) -> String { tokio::task::block_in_place(|| leftpad::pad(s, 8)) }");
        let Resolution::NeedsLlmFallback { partial, unresolved } = resolution else {
            panic!("expected fallback");
        };
        assert_eq!(unresolved, vec!["leftpad".to_string()]);
        assert!(partial.get("tokio").is_some());
        assert!(partial.get("leftpad").is_none());
    }

    #[test]
    fn test_declared_imports_are_classified() {
        let imports = vec![
            "use regex::Regex;".to_string(),
            "crate::helpers".to_string(),
            "uuid".to_string(),
        ];
        let resolution = DependencyResolver::default()
            .resolve("fn f() -> bool { Regex::new(\"a+\").is_ok() }", &imports)
            .unwrap();
        let Resolution::Resolved(set) = resolution else {
            panic!("expected static resolution");
        };
        assert!(set.get("regex").is_some());
        assert!(set.get("uuid").is_some());
        assert_eq!(set.bundled(), &["crate::helpers".to_string()]);
    }

    #[test]
    fn test_paths_inside_macros_are_seen() {
        let resolution = resolve(r#"fn f() -> String { format!("{}", uuid::Uuid::new_v4()) }"#);
        let Resolution::Resolved(set) = resolution else {
            panic!("expected static resolution");
        };
        assert!(set.get("uuid").is_some());
    }

    #[test]
    fn test_generic_params_are_local() {
        let resolution = resolve("fn make<T: Default>() -> T { T::default() }");
        assert_eq!(resolution, Resolution::Resolved(DependencySet::new()));
    }

    #[test]
    fn test_local_modules_are_bundled() {
        let resolution = resolve("fn f() -> u32 { crate::helpers::double(super::BASE) }");
        let Resolution::Resolved(set) = resolution else {
            panic!("expected static resolution");
        };
        assert_eq!(
            set.bundled(),
            &["crate::helpers".to_string(), "super::BASE".to_string()]
        );
        assert!(set.requirements().is_empty());
    }

    #[test]
    fn test_include_is_dynamic() {
        let resolution = resolve(r#"fn f() -> &'static str { include_str!("data.txt") }"#);
        assert_eq!(
            resolution,
            Resolution::NeedsLlmFallback {
                partial: DependencySet::new(),
                unresolved: vec!["include_str!".to_string()],
            }
        );
    }

    #[test]
    fn test_bare_names_from_outer_imports_need_fallback() {
        let resolution = resolve("fn f(v: Value) -> String { to_string(&v).unwrap_or_default() }");
        assert_eq!(
            resolution,
            Resolution::NeedsLlmFallback {
                partial: DependencySet::new(),
                unresolved: vec!["Value".to_string(), "to_string".to_string()],
            }
        );
    }

    #[test]
    fn test_bindings_and_recursion_are_not_references() {
        let resolution = resolve(
            r#"fn fact(n: u64) -> u64 {
                let step = |k: u64| k.saturating_sub(1);
                struct Acc { total: u64 }
                let acc = Acc { total: n };
                if n == 0 { 1 } else { acc.total * fact(step(n)) }
            }"#,
        );
        assert_eq!(resolution, Resolution::Resolved(DependencySet::new()));
    }

    #[test]
    fn test_local_imports_declare_bare_names() {
        let imports = vec!["self::Shape".to_string()];
        let resolution = DependencyResolver::default()
            .resolve("fn unit() -> Shape { Shape { side: 1 } }", &imports)
            .unwrap();
        let Resolution::Resolved(set) = resolution else {
            panic!("expected static resolution");
        };
        assert_eq!(set.bundled(), &["self::Shape".to_string()]);
    }

    #[test]
    fn test_invalid_source_is_an_error() {
        let err = DependencyResolver::default()
            .resolve("fn broken( {", &[])
            .unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }
}
