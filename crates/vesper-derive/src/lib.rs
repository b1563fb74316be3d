//! Procedural macros for vesper-core's userdata system.
//!
//! # Macros provided
//!
//! - `#[derive(UserData)]` — implements `vesper_core::value::userdata::UserDataType`
//!   for a struct, exposing public fields to scripts via `__index`/`__newindex`
//!   (backed by the shared boxed-pointer-in-a-byte-payload machinery in
//!   `vesper-core`'s `value::userdata` module).
//!
//! - `#[vesper_methods]` — attribute macro on impl blocks, generates static
//!   host-function wrappers for each `pub fn` and an inherent
//!   `__lookup_method`, which `#[derive(UserData)]`'s `get_field` falls
//!   through to, so `obj:method(...)` resolves from script code.
//!
//! # Architecture
//!
//! - `derive_userdata.rs` — `#[derive(UserData)]` implementation
//! - `methods.rs` — `#[vesper_methods]` implementation
//! - `type_utils.rs` — shared type conversion helpers (Rust ↔ `Value`)

mod derive_userdata;
mod methods;
mod type_utils;

use proc_macro::TokenStream;
use syn::parse_macro_input;

/// Derive `UserDataType` for a struct, exposing public fields to scripts.
///
/// # Supported field types (auto-converted to/from `Value`)
/// - `i8..i64`, `isize`, `u8..u64`, `usize` → `Value::Integer`
/// - `f32`, `f64` → `Value::Float`
/// - `bool` → `Value::Boolean`
/// - `String` → `Value::String`
///
/// # Field attributes
/// - `#[lua(skip)]` — exclude from script access
/// - `#[lua(readonly)]` — get only, no set
/// - `#[lua(name = "...")]` — custom script-visible name
///
/// # Example
/// ```ignore
/// #[derive(UserData)]
/// struct Point {
///     pub x: f64,
///     pub y: f64,
///     #[lua(skip)]
///     internal_id: u32,
/// }
/// ```
#[proc_macro_derive(UserData, attributes(lua))]
pub fn derive_user_data(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as syn::DeriveInput);
    derive_userdata::derive_user_data_impl(input)
}

/// Attribute macro on impl blocks — exposes public methods to scripts.
///
/// For each `pub fn` with a `&self` or `&mut self` receiver, generates a
/// static `fn(&mut State) -> Result<usize>` wrapper and an inherent
/// `__lookup_method`, which the companion `#[derive(UserData)]` impl's
/// `get_field` falls through to, so `obj:method(args)` resolves from script
/// code.
///
/// # Example
/// ```ignore
/// #[vesper_methods]
/// impl Point {
///     pub fn distance(&self) -> f64 {
///         (self.x * self.x + self.y * self.y).sqrt()
///     }
///     pub fn translate(&mut self, dx: f64, dy: f64) {
///         self.x += dx;
///         self.y += dy;
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn vesper_methods(_attr: TokenStream, input: TokenStream) -> TokenStream {
    methods::vesper_methods_impl(input)
}
