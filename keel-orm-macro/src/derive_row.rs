//! # FromRow Derive
//!
//! `#[derive(FromRow)]` for projection types: structs that are read from
//! query results but are not tables. Each field reads the column of the same
//! name, or `#[orm(alias = "...")]`; `#[orm(ignore)]` fields take their
//! `Default`.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields};

use crate::attrs::FieldAttrs;

pub fn expand(ast: DeriveInput) -> syn::Result<TokenStream> {
    let struct_name = &ast.ident;
    let Data::Struct(data) = &ast.data else {
        return Err(syn::Error::new_spanned(&ast.ident, "FromRow must be a struct"));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(&ast.ident, "FromRow must have named fields"));
    };

    let initializers = named
        .named
        .iter()
        .map(|field| {
            let ident = field.ident.as_ref().ok_or_else(|| syn::Error::new_spanned(field, "unnamed field"))?;
            let attrs = FieldAttrs::parse(&field.attrs)?;
            if attrs.is_transient() {
                return Ok(quote! { #ident: ::core::default::Default::default(), });
            }
            let column = attrs.alias.unwrap_or_else(|| ident.to_string());
            Ok(quote! { #ident: row.get(#column)?, })
        })
        .collect::<syn::Result<Vec<_>>>()?;

    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::keel_orm::FromDataRow for #struct_name #ty_generics #where_clause {
            fn from_data_row(row: &::keel_orm::RowReader<'_>) -> Result<Self, ::keel_orm::Error> {
                Ok(Self { #(#initializers)* })
            }
        }
    })
}
