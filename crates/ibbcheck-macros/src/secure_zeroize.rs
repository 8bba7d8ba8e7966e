//! Implementation of `#[derive(SecureZeroize)]`.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Result};

use crate::fields;

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;

    let clears = fields::named(&input, "SecureZeroize")?
        .iter()
        .filter(|f| !fields::has_marker(f, "no_zeroize"))
        .map(|f| {
            let ident = f.ident.as_ref().expect("named field");
            quote! { ::zeroize::Zeroize::zeroize(&mut self.#ident); }
        });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::std::ops::Drop for #name #ty_generics #where_clause {
            fn drop(&mut self) {
                #(#clears)*
            }
        }
    })
}
