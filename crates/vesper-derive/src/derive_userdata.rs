//! `#[derive(UserData)]` — auto-generate `vesper_core::value::userdata::UserDataType`
//! for Rust structs.
//!
//! Exposes public fields to scripts via `get_field`/`set_field`; methods are
//! handled separately by `#[vesper_methods]`, whose `__lookup_method` the
//! generated `get_field` falls through to.
//!
//! # Field attributes
//! - `#[lua(skip)]` — exclude field from script access
//! - `#[lua(readonly)]` — only allow get, not set
//! - `#[lua(name = "...")]` — custom script-visible name

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident};

use crate::type_utils::{field_to_value, value_to_field_assign};

struct FieldInfo {
    ident: Ident,
    ty: syn::Type,
    lua_name: String,
    readonly: bool,
}

pub fn derive_user_data_impl(input: DeriveInput) -> TokenStream {
    let name = &input.ident;

    let fields_named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => Some(&fields.named),
            _ => None,
        },
        _ => {
            return syn::Error::new_spanned(&input.ident, "UserData can only be derived for structs with named fields")
                .to_compile_error()
                .into();
        }
    };

    let Some(fields) = fields_named else {
        return gen_minimal_impl(name);
    };

    let mut field_infos: Vec<FieldInfo> = Vec::new();
    for field in fields.iter() {
        let ident = field.ident.as_ref().unwrap();
        let ty = &field.ty;
        let is_pub = matches!(field.vis, syn::Visibility::Public(_));

        let mut skip = false;
        let mut readonly = false;
        let mut lua_name: Option<String> = None;

        for attr in &field.attrs {
            if attr.path().is_ident("lua")
                && let Ok(list) = attr.meta.require_list()
            {
                let _ = list.parse_nested_meta(|meta| {
                    if meta.path.is_ident("skip") {
                        skip = true;
                    } else if meta.path.is_ident("readonly") {
                        readonly = true;
                    } else if meta.path.is_ident("name")
                        && let Ok(value) = meta.value()
                        && let Ok(lit) = value.parse::<syn::LitStr>()
                    {
                        lua_name = Some(lit.value());
                    }
                    Ok(())
                });
            }
        }

        if skip || !is_pub {
            continue;
        }

        field_infos.push(FieldInfo {
            ident: ident.clone(),
            ty: ty.clone(),
            lua_name: lua_name.unwrap_or_else(|| ident.to_string()),
            readonly,
        });
    }

    let get_field_arms = field_infos.iter().map(|f| {
        let ident = &f.ident;
        let lua_name = &f.lua_name;
        let conversion = field_to_value(&f.ty, quote!(self.#ident));
        quote! { #lua_name => Ok(Some(#conversion)), }
    });

    let set_field_arms = field_infos.iter().filter(|f| !f.readonly).map(|f| {
        let ident = &f.ident;
        let lua_name = &f.lua_name;
        let assign = value_to_field_assign(&f.ty, quote!(self.#ident), lua_name);
        quote! { #lua_name => #assign, }
    });

    let readonly_set_arms = field_infos.iter().filter(|f| f.readonly).map(|f| {
        let lua_name = &f.lua_name;
        quote! { #lua_name => Err(vesper_core::Error::type_error(format!("field '{}' is read-only", #lua_name))), }
    });

    let type_name_str = name.to_string();

    let expanded = quote! {
        impl vesper_core::value::userdata::UserDataType for #name {
            const TYPE_NAME: &'static str = #type_name_str;

            fn get_field(&self, state: &mut vesper_core::State, key: &str) -> vesper_core::Result<Option<vesper_core::Value>> {
                match key {
                    #(#get_field_arms)*
                    // Falls through to #[vesper_methods]'s inherent
                    // __lookup_method, which shadows this trait call for
                    // the concrete type.
                    _ => Ok(Self::__lookup_method(key).map(vesper_core::Value::CFunction)),
                }
            }

            fn set_field(&mut self, state: &mut vesper_core::State, key: &str, value: vesper_core::Value) -> vesper_core::Result<bool> {
                match key {
                    #(#set_field_arms)*
                    #(#readonly_set_arms)*
                    _ => Ok(false),
                }
            }
        }
    };

    expanded.into()
}

/// Tuple/unit structs get no field access — `#[vesper_methods]`'s
/// `__lookup_method` is the sole way in.
fn gen_minimal_impl(name: &Ident) -> TokenStream {
    let type_name_str = name.to_string();
    let expanded = quote! {
        impl vesper_core::value::userdata::UserDataType for #name {
            const TYPE_NAME: &'static str = #type_name_str;

            fn get_field(&self, state: &mut vesper_core::State, key: &str) -> vesper_core::Result<Option<vesper_core::Value>> {
                let _ = state;
                Ok(Self::__lookup_method(key).map(vesper_core::Value::CFunction))
            }
        }
    };
    expanded.into()
}
