//! Implementation of `#[derive(Validate)]`.

use proc_macro2::TokenStream;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::punctuated::Punctuated;
use syn::{DeriveInput, Field, Ident, LitInt, LitStr, Result, Token};

use crate::fields;

/// One constraint parsed from a `#[validate(...)]` attribute.
enum Rule {
    NonEmpty,
    Range { min: Option<i64>, max: Option<i64> },
    MaxLen(usize),
    OneOf(Vec<LitStr>),
}

impl Rule {
    fn parse(meta: ParseNestedMeta) -> Result<Self> {
        if meta.path.is_ident("non_empty") {
            return Ok(Rule::NonEmpty);
        }

        if meta.path.is_ident("max_len") {
            let lit: LitInt = meta.value()?.parse()?;
            return Ok(Rule::MaxLen(lit.base10_parse()?));
        }

        if meta.path.is_ident("range") {
            let (mut min, mut max) = (None, None);
            meta.parse_nested_meta(|bound| {
                let lit: LitInt = bound.value()?.parse()?;
                if bound.path.is_ident("min") {
                    min = Some(lit.base10_parse()?);
                } else if bound.path.is_ident("max") {
                    max = Some(lit.base10_parse()?);
                } else {
                    return Err(bound.error("expected `min` or `max`"));
                }
                Ok(())
            })?;
            return Ok(Rule::Range { min, max });
        }

        if meta.path.is_ident("one_of") {
            let content;
            syn::parenthesized!(content in meta.input);
            let options = Punctuated::<LitStr, Token![,]>::parse_terminated(&content)?;
            if options.is_empty() {
                return Err(meta.error("one_of needs at least one option"));
            }
            return Ok(Rule::OneOf(options.into_iter().collect()));
        }

        Err(meta.error("unknown validate rule; expected non_empty, range, max_len, or one_of"))
    }

    fn check(&self, field: &Ident) -> TokenStream {
        let label = field.to_string();
        match self {
            Rule::NonEmpty => quote! {
                if self.#field.is_empty() {
                    errors.push(format!("{}: must not be empty", #label));
                }
            },
            Rule::MaxLen(max) => quote! {
                if self.#field.len() > #max {
                    errors.push(format!("{}: length must be at most {}", #label, #max));
                }
            },
            Rule::Range { min, max } => {
                let lower = min.map(|min| {
                    quote! {
                        if (self.#field as i128) < (#min as i128) {
                            errors.push(format!("{}: must be at least {}", #label, #min));
                        }
                    }
                });
                let upper = max.map(|max| {
                    quote! {
                        if (self.#field as i128) > (#max as i128) {
                            errors.push(format!("{}: must be at most {}", #label, #max));
                        }
                    }
                });
                quote! { #lower #upper }
            }
            Rule::OneOf(options) => quote! {
                {
                    const ALLOWED: &[&str] = &[#(#options),*];
                    if !ALLOWED.contains(&self.#field.as_str()) {
                        errors.push(format!(
                            "{}: must be one of {:?}, got {:?}",
                            #label, ALLOWED, self.#field
                        ));
                    }
                }
            },
        }
    }
}

fn field_checks(field: &Field) -> Result<Vec<TokenStream>> {
    let ident = field.ident.as_ref().expect("named field");
    let mut rules = Vec::new();
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("validate")) {
        attr.parse_nested_meta(|meta| {
            rules.push(Rule::parse(meta)?);
            Ok(())
        })?;
    }
    Ok(rules.iter().map(|rule| rule.check(ident)).collect())
}

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;

    let mut checks = Vec::new();
    for field in fields::named(&input, "Validate")? {
        checks.extend(field_checks(field)?);
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #name #ty_generics #where_clause {
            /// Check the field-level constraints declared with `#[validate(...)]`.
            ///
            /// Returns every violation, not just the first one.
            pub fn validate(&self) -> ::std::result::Result<(), ::std::vec::Vec<::std::string::String>> {
                let mut errors: ::std::vec::Vec<::std::string::String> = ::std::vec::Vec::new();
                #(#checks)*
                if errors.is_empty() {
                    ::std::result::Result::Ok(())
                } else {
                    ::std::result::Result::Err(errors)
                }
            }
        }
    })
}
