//! # SqlEnum Derive
//!
//! `#[derive(SqlEnum)]` on a fieldless enum makes it a column type.
//!
//! By default a variant is stored as its name (`#[orm(rename = "...")]`
//! overrides it) in a text column. With `#[orm(as_int)]` on the enum,
//! variants are stored as their discriminants in an integer column.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr};

pub fn expand(ast: DeriveInput) -> syn::Result<TokenStream> {
    let enum_name = &ast.ident;
    let Data::Enum(data) = &ast.data else {
        return Err(syn::Error::new_spanned(&ast.ident, "SqlEnum must be an enum"));
    };

    let mut as_int = false;
    for attr in ast.attrs.iter().filter(|a| a.path().is_ident("orm")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("as_int") {
                as_int = true;
                Ok(())
            } else {
                Err(meta.error("unknown enum attribute"))
            }
        })?;
    }

    let mut variants = Vec::new();
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(variant, "SqlEnum variants cannot carry data"));
        }
        let mut label = variant.ident.to_string();
        for attr in variant.attrs.iter().filter(|a| a.path().is_ident("orm")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    label = meta.value()?.parse::<LitStr>()?.value();
                    Ok(())
                } else {
                    Err(meta.error("unknown variant attribute"))
                }
            })?;
        }
        variants.push((&variant.ident, label, variant.discriminant.as_ref().map(|(_, expr)| expr)));
    }

    let type_label = enum_name.to_string();
    let body = if as_int {
        let mut previous: Option<TokenStream> = None;
        let mut to_arms = Vec::new();
        let mut from_checks = Vec::new();
        for (ident, _, discriminant) in &variants {
            let value = match (discriminant, &previous) {
                (Some(expr), _) => quote! { ((#expr) as i64) },
                (None, Some(prev)) => quote! { (#prev + 1) },
                (None, None) => quote! { 0i64 },
            };
            to_arms.push(quote! { Self::#ident => #value, });
            from_checks.push(quote! { if n == #value { return Ok(Self::#ident); } });
            previous = Some(value);
        }
        quote! {
            impl ::keel_orm::DbType for #enum_name {
                fn field_type() -> ::keel_orm::FieldType {
                    ::keel_orm::FieldType::EnumInt
                }
            }

            impl ::keel_orm::ToValue for #enum_name {
                fn to_value(&self) -> ::keel_orm::Value {
                    ::keel_orm::Value::I64(match self { #(#to_arms)* })
                }
            }

            impl ::keel_orm::FromValue for #enum_name {
                fn from_value(value: ::keel_orm::Value) -> Result<Self, ::keel_orm::Error> {
                    let n = value.as_i64().ok_or_else(|| {
                        ::keel_orm::Error::conversion(format!("cannot read {} from {}", #type_label, value.kind()))
                    })?;
                    #(#from_checks)*
                    Err(::keel_orm::Error::conversion(format!("{} is not a {} value", n, #type_label)))
                }
            }
        }
    } else {
        let to_arms = variants.iter().map(|(ident, label, _)| quote! { Self::#ident => #label, });
        let exact = variants.iter().map(|(ident, label, _)| quote! { #label => return Ok(Self::#ident), });
        let loose = variants.iter().map(|(ident, label, _)| {
            quote! { if text.eq_ignore_ascii_case(#label) { return Ok(Self::#ident); } }
        });
        quote! {
            impl ::keel_orm::DbType for #enum_name {
                fn field_type() -> ::keel_orm::FieldType {
                    ::keel_orm::FieldType::EnumString
                }
            }

            impl ::keel_orm::ToValue for #enum_name {
                fn to_value(&self) -> ::keel_orm::Value {
                    let label: &str = match self { #(#to_arms)* };
                    ::keel_orm::Value::Text(label.to_string())
                }
            }

            impl ::keel_orm::FromValue for #enum_name {
                fn from_value(value: ::keel_orm::Value) -> Result<Self, ::keel_orm::Error> {
                    let ::keel_orm::Value::Text(text) = &value else {
                        return Err(::keel_orm::Error::conversion(format!("cannot read {} from {}", #type_label, value.kind())));
                    };
                    match text.as_str() {
                        #(#exact)*
                        _ => {}
                    }
                    #(#loose)*
                    Err(::keel_orm::Error::conversion(format!("'{}' is not a {} value", text, #type_label)))
                }
            }
        }
    };

    Ok(body)
}
