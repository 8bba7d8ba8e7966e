//! Named-field extraction shared by all derives.

use syn::punctuated::Punctuated;
use syn::token::Comma;
use syn::{Data, DeriveInput, Field, Fields, Result};

/// Return the named fields of a struct, or a spanned error naming the derive.
pub fn named<'a>(input: &'a DeriveInput, derive: &str) -> Result<&'a Punctuated<Field, Comma>> {
    match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => Ok(&fields.named),
            _ => Err(syn::Error::new_spanned(
                &input.ident,
                format!("{derive} only supports structs with named fields"),
            )),
        },
        _ => Err(syn::Error::new_spanned(
            &input.ident,
            format!("{derive} can only be derived for structs"),
        )),
    }
}

/// Whether the field carries a bare marker attribute such as `#[redact]`.
pub fn has_marker(field: &Field, marker: &str) -> bool {
    field.attrs.iter().any(|a| a.path().is_ident(marker))
}
