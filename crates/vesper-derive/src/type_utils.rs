//! Shared type conversion utilities for vesper-derive.
//!
//! Handles mapping between Rust types and `vesper_core::Value`, used by
//! both `#[derive(UserData)]` (field access) and `#[vesper_methods]`
//! (argument/return conversion).

use quote::quote;

/// Normalize a `syn::Type` to a simple string for matching.
///
/// Strips whitespace so `Option < i64 >` becomes `Option<i64>`.
pub fn normalize_type(ty: &syn::Type) -> String {
    quote!(#ty).to_string().replace(' ', "")
}

/// Generate code converting a Rust field value into a `vesper_core::Value`
/// expression, for the derived `get_field` body.
pub fn field_to_value(ty: &syn::Type, accessor: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    match normalize_type(ty).as_str() {
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { vesper_core::Value::Integer(#accessor as i64) }
        }
        "f32" | "f64" => {
            quote! { vesper_core::Value::Float(#accessor as f64) }
        }
        "bool" => quote! { vesper_core::Value::Boolean(#accessor) },
        "String" => {
            quote! {
                vesper_core::Value::String(state.heap.alloc_string(vesper_core::value::string::LuaStr::new(&#accessor))?)
            }
        }
        other => {
            let msg = format!("#[derive(UserData)] does not know how to expose field type `{other}`");
            quote! { compile_error!(#msg) }
        }
    }
}

/// Generate the `Result<bool>`-typed match-arm body for the derived
/// `set_field`, assigning into `target` after converting `value`.
pub fn value_to_field_assign(
    ty: &syn::Type,
    target: proc_macro2::TokenStream,
    field_name: &str,
) -> proc_macro2::TokenStream {
    match normalize_type(ty).as_str() {
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! {
                match value.as_integer() {
                    Some(i) => { #target = i as #ty; Ok(true) }
                    None => Err(vesper_core::Error::type_error(format!("bad value for field '{}' (integer expected)", #field_name))),
                }
            }
        }
        "f32" | "f64" => {
            quote! {
                match value.as_float() {
                    Some(f) => { #target = f as #ty; Ok(true) }
                    None => Err(vesper_core::Error::type_error(format!("bad value for field '{}' (number expected)", #field_name))),
                }
            }
        }
        "bool" => {
            quote! {
                { #target = value.is_truthy(); Ok(true) }
            }
        }
        "String" => {
            quote! {
                match value {
                    vesper_core::Value::String(id) => {
                        let s = state.heap.strings.get(id.index()).map(|s| s.as_str().to_string()).unwrap_or_default();
                        #target = s;
                        Ok(true)
                    }
                    _ => Err(vesper_core::Error::type_error(format!("bad value for field '{}' (string expected)", #field_name))),
                }
            }
        }
        other => {
            let msg = format!("#[derive(UserData)] does not know how to accept field type `{other}`");
            quote! { compile_error!(#msg) }
        }
    }
}

/// Generate code extracting argument `arg_index` (0-based stack index,
/// `self` sits at index 0) as a Rust value of type `ty`, for a
/// `#[vesper_methods]` wrapper.
pub fn lua_arg_to_rust(ty: &syn::Type, arg_index: i64, fname: &str, param_name: &str) -> proc_macro2::TokenStream {
    let type_str = normalize_type(ty);
    if let Some(inner) = type_str.strip_prefix("Option<").and_then(|s| s.strip_suffix('>')) {
        let inner_ty: syn::Type = syn::parse_str(inner).unwrap_or_else(|_| ty.clone());
        let some_extract = lua_arg_to_rust(&inner_ty, arg_index, fname, param_name);
        return quote! {
            if matches!(state.get(#arg_index), vesper_core::Value::Nil) { None } else { Some(#some_extract) }
        };
    }
    match type_str.as_str() {
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! {
                state.to_integer(#arg_index).ok_or_else(|| vesper_core::Error::type_error(
                    format!("bad argument #{} to '{}' ('{}' expects an integer)", #arg_index, #fname, #param_name)
                ))? as #ty
            }
        }
        "f32" | "f64" => {
            quote! {
                state.to_float(#arg_index).ok_or_else(|| vesper_core::Error::type_error(
                    format!("bad argument #{} to '{}' ('{}' expects a number)", #arg_index, #fname, #param_name)
                ))? as #ty
            }
        }
        "bool" => quote! { state.to_bool(#arg_index) },
        "String" => {
            quote! {
                state.to_string_value(#arg_index).ok_or_else(|| vesper_core::Error::type_error(
                    format!("bad argument #{} to '{}' ('{}' expects a string)", #arg_index, #fname, #param_name)
                ))?
            }
        }
        "&str" | "&'staticstr" => {
            quote! {
                state.to_string_value(#arg_index).ok_or_else(|| vesper_core::Error::type_error(
                    format!("bad argument #{} to '{}' ('{}' expects a string)", #arg_index, #fname, #param_name)
                ))?.as_str()
            }
        }
        other => {
            let msg = format!("#[vesper_methods] does not know how to extract parameter type `{other}`");
            quote! { compile_error!(#msg) }
        }
    }
}

/// Generate the statement that converts a `#[vesper_methods]` method's
/// return value (bound to `__result`) into pushed stack values and an
/// `Ok(n)`. Unit returns zero values; `Option<T>` pushes nil on `None`.
/// Arbitrary `Result<T, E>` returns are not supported — methods fallible
/// enough to need that should return `vesper_core::Result<T>` directly,
/// which this recognizes as its `Ok`/`Err` carries a `vesper_core::Error`.
pub fn rust_return_to_lua(ty: &syn::Type) -> proc_macro2::TokenStream {
    let type_str = normalize_type(ty);
    if type_str == "vesper_core::Result<()>" || type_str == "Result<()>" {
        return quote! { __result?; Ok(0) };
    }
    if let Some(inner) = type_str
        .strip_prefix("vesper_core::Result<")
        .or_else(|| type_str.strip_prefix("Result<"))
        .and_then(|s| s.strip_suffix('>'))
    {
        let inner_ty: syn::Type = syn::parse_str(inner).unwrap_or_else(|_| ty.clone());
        let push = push_value_expr(&inner_ty, quote! { __ok });
        return quote! {
            match __result {
                Ok(__ok) => { #push Ok(1) }
                Err(e) => Err(e),
            }
        };
    }
    if let Some(inner) = type_str.strip_prefix("Option<").and_then(|s| s.strip_suffix('>')) {
        let inner_ty: syn::Type = syn::parse_str(inner).unwrap_or_else(|_| ty.clone());
        let push = push_value_expr(&inner_ty, quote! { __some });
        return quote! {
            match __result {
                Some(__some) => { #push }
                None => state.push_nil(),
            }
            Ok(1)
        };
    }
    let push = push_value_expr(ty, quote! { __result });
    quote! { #push Ok(1) }
}

fn push_value_expr(ty: &syn::Type, accessor: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    match normalize_type(ty).as_str() {
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { state.push_integer(#accessor as i64); }
        }
        "f32" | "f64" => quote! { state.push_float(#accessor as f64); },
        "bool" => quote! { state.push_bool(#accessor); },
        "String" => quote! { state.push_string(&#accessor)?; },
        other => {
            let msg = format!("#[vesper_methods] does not know how to return type `{other}`");
            quote! { compile_error!(#msg) }
        }
    }
}
