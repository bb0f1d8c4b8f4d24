// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Proc macros for fncloud-core.
//!
//! Provides the `#[remote]` attribute macro.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::meta::ParseNestedMeta;
use syn::{
    Expr, FnArg, Ident, ItemFn, LitInt, LitStr, Pat, ReturnType, Type, parse_macro_input,
    spanned::Spanned,
};

/// Makes a function or method remotely deployable.
///
/// The annotated item is emitted unchanged, so local calls keep working. The
/// macro adds a companion `<name>_remote()` constructor returning a
/// `fncloud_core::Remote` that carries the function's source, signature,
/// deployment overrides and a JSON invocation handler.
///
/// # Arguments
///
/// - `endpoint` or `endpoint(methods = "GET, POST")`: expose as an HTTP endpoint
/// - `memory = 2048`, `cpu = 2`, `timeout = 120`: runtime overrides
/// - `region = "eu-west"`
/// - `imports = "regex, crate::helpers"`: extra imports for dependency resolution;
///   `use` items may be given whole (`"use serde_json::{Value, to_string};"`)
/// - `default(name = value)`: argument defaults used by remote invocations
///
/// # Requirements
///
/// - Function must be synchronous and non-generic
/// - Parameters must be owned `Deserialize` types bound to plain identifiers
/// - Return type must implement `Serialize`
/// - Methods: `Self` must implement `Serialize + DeserializeOwned`
///
/// # Example
///
/// ```ignore
/// use fncloud_core::remote;
///
/// #[remote(memory = 2048, default(b = 1))]
/// pub fn add(a: i64, b: i64) -> i64 {
///     a + b
/// }
///
/// assert_eq!(add(1, 2), 3);
/// let url = add_remote().get_url(&cloud, deploy_token).await?;
/// ```
#[proc_macro_attribute]
pub fn remote(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = RemoteArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);
    let input = parse_macro_input!(item as ItemFn);

    match generate_remote_wrapper(args, input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct RemoteArgs {
    /// `Some` when `endpoint` was given
    endpoint: Option<Vec<Ident>>,
    memory: Option<u32>,
    cpu: Option<u32>,
    timeout: Option<u64>,
    region: Option<String>,
    imports: Vec<String>,
    defaults: Vec<(Ident, Expr)>,
}

impl RemoteArgs {
    fn parse(&mut self, meta: ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("endpoint") {
            let mut methods = vec![format_ident!("Get"), format_ident!("Post")];
            if meta.input.peek(syn::token::Paren) {
                meta.parse_nested_meta(|inner| {
                    if !inner.path.is_ident("methods") {
                        return Err(inner.error("#[remote] endpoint only accepts `methods`"));
                    }
                    let lit: LitStr = inner.value()?.parse()?;
                    methods = parse_http_methods(&lit)?;
                    Ok(())
                })?;
            }
            self.endpoint = Some(methods);
        } else if meta.path.is_ident("memory") {
            let lit: LitInt = meta.value()?.parse()?;
            self.memory = Some(lit.base10_parse()?);
        } else if meta.path.is_ident("cpu") {
            let lit: LitInt = meta.value()?.parse()?;
            self.cpu = Some(lit.base10_parse()?);
        } else if meta.path.is_ident("timeout") {
            let lit: LitInt = meta.value()?.parse()?;
            self.timeout = Some(lit.base10_parse()?);
        } else if meta.path.is_ident("region") {
            let lit: LitStr = meta.value()?.parse()?;
            self.region = Some(lit.value());
        } else if meta.path.is_ident("imports") {
            let lit: LitStr = meta.value()?.parse()?;
            self.imports = split_imports(&lit.value());
        } else if meta.path.is_ident("default") {
            meta.parse_nested_meta(|inner| {
                let name = inner
                    .path
                    .get_ident()
                    .cloned()
                    .ok_or_else(|| inner.error("#[remote] default expects `name = value`"))?;
                let value: Expr = inner.value()?.parse()?;
                self.defaults.push((name, value));
                Ok(())
            })?;
        } else {
            return Err(meta.error(
                "unsupported #[remote] argument; expected endpoint, memory, cpu, timeout, region, imports or default",
            ));
        }
        Ok(())
    }
}

fn parse_http_methods(lit: &LitStr) -> syn::Result<Vec<Ident>> {
    let mut methods = Vec::new();
    for method in lit.value().split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let variant = match method.to_ascii_uppercase().as_str() {
            "GET" => "Get",
            "POST" => "Post",
            "PUT" => "Put",
            "PATCH" => "Patch",
            "DELETE" => "Delete",
            _ => {
                return Err(syn::Error::new(
                    lit.span(),
                    format!("#[remote] unknown HTTP method `{}`", method),
                ));
            }
        };
        methods.push(format_ident!("{}", variant));
    }
    if methods.is_empty() {
        return Err(syn::Error::new(
            lit.span(),
            "#[remote] endpoint needs at least one HTTP method",
        ));
    }
    Ok(methods)
}

/// How a method takes its receiver.
enum Receiver {
    Ref,
    RefMut,
    Owned,
}

struct Param<'a> {
    ident: &'a Ident,
    ty: &'a Type,
}

fn generate_remote_wrapper(args: RemoteArgs, input: ItemFn) -> syn::Result<TokenStream2> {
    let fn_name = &input.sig.ident;
    let fn_name_str = fn_name.to_string();
    let remote_name = format_ident!("{}_remote", fn_name);
    let vis = &input.vis;
    let sig = &input.sig;

    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new(
            asyncness.span,
            "#[remote] only works with synchronous functions",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            sig.generics.span(),
            "#[remote] does not support generic functions",
        ));
    }

    let receiver = extract_receiver(sig)?;
    let params = extract_params(sig)?;

    if receiver.is_some() && args.endpoint.is_some() {
        return Err(syn::Error::new(
            sig.fn_token.span,
            "#[remote(endpoint)] cannot be applied to methods",
        ));
    }
    for (name, _) in &args.defaults {
        if !params.iter().any(|p| p.ident == name) {
            return Err(syn::Error::new(
                name.span(),
                format!("#[remote] default for unknown parameter `{}`", name),
            ));
        }
    }

    // Captured source excludes attributes so doc edits do not change identity
    let block = &input.block;
    let source = quote!(#sig #block).to_string();

    let return_ty = match &sig.output {
        ReturnType::Default => quote!(()),
        ReturnType::Type(_, ty) => quote!(#ty),
    };
    let return_ty_str = return_ty.to_string();

    // Signature metadata
    let param_specs = params.iter().map(|p| {
        let name = p.ident.to_string();
        let ty = p.ty;
        let ty_str = quote!(#ty).to_string();
        match args.defaults.iter().find(|(n, _)| n == p.ident) {
            Some((_, value)) => quote! {
                ::fncloud_core::Param::new(#name, #ty_str)
                    .with_default(::fncloud_core::__private::serde_json::json!(#value))
            },
            None => quote! { ::fncloud_core::Param::new(#name, #ty_str) },
        }
    });

    let kind = match (&args.endpoint, &receiver) {
        (Some(methods), _) => quote! {
            ::fncloud_core::Kind::Endpoint {
                methods: vec![#(::fncloud_core::HttpMethod::#methods),*],
            }
        },
        (None, Some(_)) => quote!(::fncloud_core::Kind::Method),
        (None, None) => quote!(::fncloud_core::Kind::Function),
    };

    let class = receiver
        .as_ref()
        .map(|_| quote!(.with_class(::std::any::type_name::<Self>())));

    let imports = &args.imports;
    let memory = option_tokens(args.memory);
    let cpu = option_tokens(args.cpu);
    let timeout = option_tokens(args.timeout);
    let region = match &args.region {
        Some(region) => quote!(::std::option::Option::Some(#region.to_string())),
        None => quote!(::std::option::Option::None),
    };

    // Argument decoding shared by both handler shapes
    let arg_idents: Vec<_> = params.iter().map(|p| p.ident).collect();
    let decode_args = params.iter().map(|p| {
        let ident = p.ident;
        let ty = p.ty;
        let name = ident.to_string();
        quote! { let #ident: #ty = __inv.arg(#name)?; }
    });
    let param_tys: Vec<_> = params.iter().map(|p| p.ty).collect();

    let (local, fn_ptr, call) = match &receiver {
        None => (
            quote!(#fn_name),
            quote!(fn(#(#param_tys),*) -> #return_ty),
            quote! {
                let __result = #fn_name(#(#arg_idents),*);
                ::fncloud_core::InvocationOutput::value(&__result)
            },
        ),
        Some(Receiver::Ref) => (
            quote!(Self::#fn_name),
            quote!(fn(&Self, #(#param_tys),*) -> #return_ty),
            quote! {
                let __receiver: Self = __inv.receiver()?;
                let __result = Self::#fn_name(&__receiver, #(#arg_idents),*);
                ::fncloud_core::InvocationOutput::with_state(&__result, &__receiver)
            },
        ),
        Some(Receiver::RefMut) => (
            quote!(Self::#fn_name),
            quote!(fn(&mut Self, #(#param_tys),*) -> #return_ty),
            quote! {
                let mut __receiver: Self = __inv.receiver()?;
                let __result = Self::#fn_name(&mut __receiver, #(#arg_idents),*);
                ::fncloud_core::InvocationOutput::with_state(&__result, &__receiver)
            },
        ),
        Some(Receiver::Owned) => (
            quote!(Self::#fn_name),
            quote!(fn(Self, #(#param_tys),*) -> #return_ty),
            quote! {
                let __receiver: Self = __inv.receiver()?;
                let __result = Self::#fn_name(__receiver, #(#arg_idents),*);
                ::fncloud_core::InvocationOutput::value(&__result)
            },
        ),
    };

    Ok(quote! {
        #input

        #[allow(dead_code)]
        #vis fn #remote_name() -> ::fncloud_core::Remote<#fn_ptr> {
            let __spec = ::fncloud_core::FunctionSpec::new(::std::module_path!(), #fn_name_str, #source)
                .with_kind(#kind)
                #class
                .with_signature(::fncloud_core::Signature {
                    params: vec![#(#param_specs),*],
                    return_type: #return_ty_str.to_string(),
                })
                .with_imports(vec![#(#imports),*])
                .with_config(::fncloud_core::DeploymentConfig {
                    memory: #memory,
                    cpu: #cpu,
                    timeout: #timeout,
                    region: #region,
                });

            let __handler = ::fncloud_core::Handler::new(
                |__inv: ::fncloud_core::Invocation| -> ::std::result::Result<
                    ::fncloud_core::InvocationOutput,
                    ::fncloud_core::InvokeError,
                > {
                    #(#decode_args)*
                    #call
                },
            );

            ::fncloud_core::Remote::new(#local as #fn_ptr, __spec, __handler)
        }
    })
}

/// Split on commas outside `{}` groups.
fn split_imports(value: &str) -> Vec<String> {
    let mut imports = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in value.chars() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                imports.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    imports.push(current);
    imports
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn option_tokens<T: quote::ToTokens>(value: Option<T>) -> TokenStream2 {
    match value {
        Some(value) => quote!(::std::option::Option::Some(#value)),
        None => quote!(::std::option::Option::None),
    }
}

fn extract_receiver(sig: &syn::Signature) -> syn::Result<Option<Receiver>> {
    let Some(receiver) = sig.receiver() else {
        return Ok(None);
    };
    if receiver.colon_token.is_some() {
        return Err(syn::Error::new(
            receiver.span(),
            "#[remote] methods must take `self`, `&self` or `&mut self`",
        ));
    }
    Ok(Some(match (&receiver.reference, &receiver.mutability) {
        (Some(_), Some(_)) => Receiver::RefMut,
        (Some(_), None) => Receiver::Ref,
        (None, _) => Receiver::Owned,
    }))
}

fn extract_params(sig: &syn::Signature) -> syn::Result<Vec<Param<'_>>> {
    let mut params = Vec::new();
    for arg in sig.inputs.iter() {
        let FnArg::Typed(pat_type) = arg else {
            continue;
        };
        let Pat::Ident(pat_ident) = pat_type.pat.as_ref() else {
            return Err(syn::Error::new(
                pat_type.pat.span(),
                "#[remote] requires parameters to be simple identifiers",
            ));
        };
        match pat_type.ty.as_ref() {
            Type::Reference(_) => {
                return Err(syn::Error::new(
                    pat_type.ty.span(),
                    "#[remote] parameters must be owned types",
                ));
            }
            Type::ImplTrait(_) => {
                return Err(syn::Error::new(
                    pat_type.ty.span(),
                    "#[remote] parameters cannot use `impl Trait`",
                ));
            }
            _ => {}
        }
        params.push(Param {
            ident: &pat_ident.ident,
            ty: pat_type.ty.as_ref(),
        });
    }
    Ok(params)
}
