//! Implementation of `#[derive(Redact)]`.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Result};

use crate::fields;

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let name_str = name.to_string();

    let entries = fields::named(&input, "Redact")?.iter().map(|f| {
        let ident = f.ident.as_ref().expect("named field");
        let label = ident.to_string();
        if fields::has_marker(f, "redact") {
            quote! { .field(#label, &"[REDACTED]") }
        } else {
            quote! { .field(#label, &self.#ident) }
        }
    });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::std::fmt::Debug for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_struct(#name_str)
                    #(#entries)*
                    .finish()
            }
        }
    })
}
