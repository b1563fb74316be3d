//! `#[vesper_methods]` — attribute macro for impl blocks.
//!
//! Generates a static host-function wrapper for each `pub fn` in the impl
//! block, plus an inherent `__lookup_method(key) -> Option<CFunction>` that
//! maps script method names to those wrappers.
//!
//! `#[derive(UserData)]`'s generated `get_field` falls through to
//! `Self::__lookup_method(key)` for any name it doesn't recognize as a
//! field — an inherent method defined here shadows that trait method's own
//! default resolution for the concrete type, so every `#[derive(UserData)]`
//! struct needs a companion `#[vesper_methods] impl TypeName { ... }` block
//! (it may be empty) for this to resolve.
//!
//! # Supported parameter types
//! - `i8..i64`, `u8..u64`, `isize`, `usize` — via `to_integer`
//! - `f32`, `f64` — via `to_float`
//! - `bool` — via `to_bool`
//! - `String`, `&str` — via `to_string_value`
//! - `Option<T>` — nil/missing → `None`
//!
//! # Supported return types
//! - `()` — zero values
//! - Numeric, bool, `String` — one pushed value
//! - `Option<T>` — `None` → nil
//! - `vesper_core::Result<T>` — `Err` propagates as a script error

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{FnArg, ItemImpl, Pat, ReturnType, parse_macro_input};

use crate::type_utils::{lua_arg_to_rust, rust_return_to_lua};

struct MethodInfo {
    rust_name: syn::Ident,
    lua_name: String,
    is_mut: bool,
    params: Vec<(syn::Ident, syn::Type)>,
    return_type: Option<syn::Type>,
}

pub fn vesper_methods_impl(input: TokenStream) -> TokenStream {
    let item_impl = parse_macro_input!(input as ItemImpl);
    let self_ty = &item_impl.self_ty;

    let mut methods: Vec<MethodInfo> = Vec::new();

    for item in &item_impl.items {
        let syn::ImplItem::Fn(method) = item else { continue };
        if !matches!(method.vis, syn::Visibility::Public(_)) {
            continue;
        }
        let sig = &method.sig;
        if sig.asyncness.is_some() {
            continue;
        }
        let Some(FnArg::Receiver(first_arg)) = sig.inputs.first() else {
            continue;
        };
        let is_mut = first_arg.mutability.is_some();

        let mut params = Vec::new();
        for arg in sig.inputs.iter().skip(1) {
            if let FnArg::Typed(pat_type) = arg {
                let param_name = if let Pat::Ident(pat_ident) = pat_type.pat.as_ref() {
                    pat_ident.ident.clone()
                } else {
                    format_ident!("__arg")
                };
                params.push((param_name, (*pat_type.ty).clone()));
            }
        }

        let return_type = match &sig.output {
            ReturnType::Default => None,
            ReturnType::Type(_, ty) => Some((**ty).clone()),
        };

        let rust_name = sig.ident.clone();
        methods.push(MethodInfo {
            lua_name: rust_name.to_string(),
            rust_name,
            is_mut,
            params,
            return_type,
        });
    }

    let wrapper_fns: Vec<proc_macro2::TokenStream> = methods.iter().map(|m| gen_wrapper_fn(self_ty, m)).collect();
    let lookup_arms: Vec<proc_macro2::TokenStream> = methods
        .iter()
        .map(|m| {
            let lua_name = &m.lua_name;
            let wrapper_name = format_ident!("__vesper_method_{}", m.rust_name);
            quote! { #lua_name => Some(#wrapper_name), }
        })
        .collect();

    let expanded = quote! {
        #item_impl

        impl #self_ty {
            #[allow(unused)]
            pub fn __lookup_method(key: &str) -> Option<vesper_core::value::CFunction> {
                #(#wrapper_fns)*

                match key {
                    #(#lookup_arms)*
                    _ => None,
                }
            }
        }
    };

    expanded.into()
}

fn gen_wrapper_fn(self_ty: &syn::Type, method: &MethodInfo) -> proc_macro2::TokenStream {
    let wrapper_name = format_ident!("__vesper_method_{}", method.rust_name);
    let rust_name = &method.rust_name;
    let fname = &method.lua_name;

    let param_extractions: Vec<proc_macro2::TokenStream> = method
        .params
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            let arg_index = (i + 1) as i64;
            let param_name_str = name.to_string();
            let extract = lua_arg_to_rust(ty, arg_index, fname, &param_name_str);
            quote! { let #name = #extract; }
        })
        .collect();

    let param_names: Vec<&syn::Ident> = method.params.iter().map(|(name, _)| name).collect();

    let call_and_return = if method.is_mut {
        gen_call(self_ty, rust_name, fname, &param_names, &method.return_type, true)
    } else {
        gen_call(self_ty, rust_name, fname, &param_names, &method.return_type, false)
    };

    quote! {
        fn #wrapper_name(state: &mut vesper_core::State) -> vesper_core::Result<usize> {
            #(#param_extractions)*
            #call_and_return
        }
    }
}

fn gen_call(
    self_ty: &syn::Type,
    method_name: &syn::Ident,
    fname: &str,
    param_names: &[&syn::Ident],
    return_type: &Option<syn::Type>,
    is_mut: bool,
) -> proc_macro2::TokenStream {
    let borrow_fn = if is_mut {
        quote! { vesper_core::value::userdata::borrow_mut }
    } else {
        quote! { vesper_core::value::userdata::borrow }
    };
    let type_name = quote!(#self_ty).to_string();

    let borrow_stmt = quote! {
        let __this = #borrow_fn::<#self_ty>(state, 0)
            .ok_or_else(|| vesper_core::Error::type_error(format!("bad argument #1 to '{}' ({} expected)", #fname, #type_name)))?;
    };

    match return_type {
        None => quote! {
            #borrow_stmt
            __this.#method_name(#(#param_names),*);
            Ok(0)
        },
        Some(ret_ty) => {
            let push_result = rust_return_to_lua(ret_ty);
            quote! {
                #borrow_stmt
                let __result = __this.#method_name(#(#param_names),*);
                #push_result
            }
        }
    }
}
