#![deny(unsafe_code)]

//! Derive macros used across the ibbcheck workspace.
//!
//! - `#[derive(Redact)]` keeps account passwords out of `Debug` output
//! - `#[derive(Validate)]` generates a `validate()` method from field rules
//! - `#[derive(SecureZeroize)]` clears credential memory on drop

extern crate proc_macro;

mod fields;
mod redact;
mod secure_zeroize;
mod validate;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derive `Debug`, printing `[REDACTED]` for every field marked `#[redact]`.
///
/// ```ignore
/// use ibbcheck_macros::Redact;
///
/// #[derive(Redact)]
/// struct Account {
///     pub jid: String,
///     #[redact]
///     pub password: String,
/// }
/// ```
#[proc_macro_derive(Redact, attributes(redact))]
pub fn derive_redact(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    redact::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derive a `validate(&self) -> Result<(), Vec<String>>` method.
///
/// Field rules:
/// - `#[validate(non_empty)]`
/// - `#[validate(range(min = N, max = M))]` for integers
/// - `#[validate(max_len = N)]` for strings and collections
/// - `#[validate(one_of("a", "b"))]` for string fields
///
/// Every violated rule contributes one message of the form
/// `"<field>: <problem>"`; the list is in field declaration order.
///
/// ```ignore
/// use ibbcheck_macros::Validate;
///
/// #[derive(Validate)]
/// struct Client {
///     #[validate(non_empty, max_len = 3071)]
///     pub jid: String,
///     #[validate(range(min = 1, max = 65535))]
///     pub port: u16,
/// }
/// ```
#[proc_macro_derive(Validate, attributes(validate))]
pub fn derive_validate(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    validate::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derive a `Drop` impl that zeroizes every field not marked `#[no_zeroize]`.
///
/// The consuming crate needs `zeroize` as a dependency.
#[proc_macro_derive(SecureZeroize, attributes(no_zeroize))]
pub fn derive_secure_zeroize(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    secure_zeroize::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
