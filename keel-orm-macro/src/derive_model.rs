//! # Model Derive Macro Implementation
//!
//! Expands `#[derive(Model)]` into:
//!
//! 1. `Model`: the definition builder plus by-name field access
//! 2. `FromDataRow`: reads each column field through the model's definition
//! 3. `References`: loading and saving of `#[orm(reference)]` fields
//! 4. `SoftDelete`, when a field carries `#[orm(soft_delete)]`
//! 5. a `<model>_fields` module of field-name constants
//!
//! Column types come from each field type's `DbType` impl, so any type with
//! `DbType + ToValue + FromValue` (including `#[derive(SqlEnum)]` enums and
//! `Json<T>`) can be a column.

use heck::{ToShoutySnakeCase, ToSnakeCase};
use proc_macro2::{Span, TokenStream};
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field, Fields, Ident, LitStr, Path};

use crate::attrs::{FieldAttrs, ModelAttrs};
use crate::types::{ReferenceShape, reference_shape};

struct ModelField<'a> {
    field: &'a Field,
    ident: &'a Ident,
    name: String,
    attrs: FieldAttrs,
}

pub fn expand(ast: DeriveInput) -> syn::Result<TokenStream> {
    let struct_name = &ast.ident;
    let Data::Struct(data) = &ast.data else {
        return Err(syn::Error::new_spanned(&ast.ident, "Model must be a struct"));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(&ast.ident, "Model must have named fields"));
    };

    let model_attrs = ModelAttrs::parse(&ast.attrs)?;
    let fields = named
        .named
        .iter()
        .map(|field| {
            let ident = field.ident.as_ref().ok_or_else(|| syn::Error::new_spanned(field, "unnamed field"))?;
            Ok(ModelField { field, ident, name: ident.to_string(), attrs: FieldAttrs::parse(&field.attrs)? })
        })
        .collect::<syn::Result<Vec<_>>>()?;

    let columns: Vec<&ModelField> = fields.iter().filter(|f| !f.attrs.is_transient()).collect();

    let definition = definition_builder(struct_name, &model_attrs, &fields)?;
    let get_arms = columns.iter().map(|f| {
        let ident = f.ident;
        let name = &f.name;
        quote! { #name => Some(::keel_orm::ToValue::to_value(&self.#ident)), }
    });
    let set_arms = columns.iter().map(|f| {
        let ident = f.ident;
        let name = &f.name;
        quote! {
            #name => {
                self.#ident = ::keel_orm::FromValue::from_value(value)
                    .map_err(|e| ::keel_orm::Error::mapping(#name, e.to_string()))?;
                Ok(())
            }
        }
    });
    let struct_label = struct_name.to_string();

    let from_row = row_initializers(&fields);
    let references = references_impl(struct_name, &fields);
    let soft_delete = soft_delete_impl(struct_name, &fields)?;
    let constants = fields_module(struct_name, &fields);

    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::keel_orm::Model for #struct_name #ty_generics #where_clause {
            fn build_definition() -> ::keel_orm::ModelDefinition {
                #definition
            }

            fn get_value(&self, field: &str) -> Option<::keel_orm::Value> {
                match field {
                    #(#get_arms)*
                    _ => None,
                }
            }

            fn set_value(&mut self, field: &str, value: ::keel_orm::Value) -> Result<(), ::keel_orm::Error> {
                match field {
                    #(#set_arms)*
                    _ => Err(::keel_orm::Error::invalid_argument(format!("{} has no field {}", #struct_label, field))),
                }
            }
        }

        impl #impl_generics ::keel_orm::FromDataRow for #struct_name #ty_generics #where_clause {
            fn from_data_row(row: &::keel_orm::RowReader<'_>) -> Result<Self, ::keel_orm::Error> {
                let def = <Self as ::keel_orm::Model>::model_definition();
                let row = row.for_model(&def);
                Ok(Self { #(#from_row)* })
            }
        }

        #references
        #soft_delete
        #constants
    })
}

/// `ModelDefinition::new(..).field(..)...build()`.
fn definition_builder(struct_name: &Ident, attrs: &ModelAttrs, fields: &[ModelField]) -> syn::Result<TokenStream> {
    let name = struct_name.to_string();
    let mut calls = Vec::new();

    if let Some(table) = &attrs.table {
        calls.push(quote! { .alias(#table) });
    }
    if let Some(schema) = &attrs.schema {
        calls.push(quote! { .schema(#schema) });
    }
    if attrs.no_implicit_key {
        calls.push(quote! { .no_implicit_key() });
    }

    for f in fields {
        if f.attrs.ignore {
            continue;
        }
        if f.attrs.reference {
            let field_name = &f.name;
            let (target, many) = match reference_shape(&f.field.ty) {
                Some(ReferenceShape::Many(ty)) => (ty, true),
                Some(ReferenceShape::One(ty)) => (ty, false),
                None => {
                    return Err(syn::Error::new_spanned(&f.field.ty, "reference fields must be Vec<Model> or Option<Model>"));
                }
            };
            calls.push(quote! { .reference(#field_name, ::keel_orm::ModelRef::of::<#target>(), #many) });
            continue;
        }
        let column = field_definition(f)?;
        calls.push(quote! { .field(#column) });
    }

    for group in &attrs.unique {
        let columns = &group.fields;
        let name = match &group.name {
            Some(n) => quote! { Some(#n) },
            None => quote! { None },
        };
        calls.push(quote! { .unique_constraint(&[#(#columns),*], #name) });
    }
    for (group, unique) in &attrs.indexes {
        let columns = &group.fields;
        let mut index = quote! { ::keel_orm::CompositeIndex::new(&[#(#columns),*]) };
        if *unique {
            index = quote! { #index.unique() };
        }
        if let Some(n) = &group.name {
            index = quote! { #index.name(#n) };
        }
        calls.push(quote! { .composite_index(#index) });
    }

    for (hook, sql) in [
        ("pre_create_sql", &attrs.pre_create),
        ("post_create_sql", &attrs.post_create),
        ("pre_drop_sql", &attrs.pre_drop),
        ("post_drop_sql", &attrs.post_drop),
    ] {
        if let Some(sql) = sql {
            let method = Ident::new(hook, Span::call_site());
            calls.push(quote! { .#method(#sql) });
        }
    }

    if let Some(f) = fields.iter().find(|f| f.attrs.soft_delete) {
        let field_name = &f.name;
        calls.push(quote! { .soft_delete_field(#field_name) });
    }

    Ok(quote! {
        ::keel_orm::ModelDefinition::new(#name)
            #(#calls)*
            .build()
    })
}

fn field_definition(f: &ModelField) -> syn::Result<TokenStream> {
    let ty = &f.field.ty;
    let name = &f.name;
    let a = &f.attrs;
    let mut calls = Vec::new();

    let flags = [
        (a.primary_key, quote! { .primary_key() }),
        (a.auto_increment, quote! { .auto_increment() }),
        (a.auto_id, quote! { .auto_id() }),
        (a.max_text, quote! { .max_text() }),
        (a.computed, quote! { .computed() }),
        (a.unique, quote! { .unique() }),
        (a.index, quote! { .index() }),
    ];
    calls.extend(flags.into_iter().filter(|(on, _)| *on).map(|(_, call)| call));

    if let Some(alias) = &a.alias {
        calls.push(quote! { .alias(#alias) });
    }
    if let Some(length) = a.length {
        calls.push(quote! { .length(#length) });
    }
    if let Some(precision) = a.precision {
        let scale = a.scale.unwrap_or(0);
        calls.push(quote! { .precision(#precision, #scale) });
    } else if a.scale.is_some() {
        return Err(syn::Error::new_spanned(ty, "`scale` requires `precision`"));
    }
    if let Some(sql) = &a.default {
        calls.push(quote! { .default_value(#sql) });
    }
    if let Some(sql) = &a.custom_field {
        calls.push(quote! { .custom_field(#sql) });
    }
    if let Some(sql) = &a.custom_select {
        calls.push(quote! { .custom_select(#sql) });
    }
    if let Some(expr) = &a.check {
        calls.push(quote! { .check(#expr) });
    }
    if let Some(target) = &a.foreign_key {
        calls.push(foreign_key(target, a)?);
    } else if a.on_delete.is_some() || a.on_update.is_some() || a.fk_name.is_some() {
        return Err(syn::Error::new_spanned(ty, "`on_delete`, `on_update` and `fk_name` require `foreign_key`"));
    }

    Ok(quote! {
        ::keel_orm::FieldDefinition::new(#name, <#ty as ::keel_orm::DbType>::field_type())
            .nullable(<#ty as ::keel_orm::DbType>::NULLABLE)
            #(#calls)*
    })
}

/// `foreign_key = "Owner"` targets the key of `Owner`;
/// `foreign_key = "Owner::code"` targets its `code` field.
fn foreign_key(target: &LitStr, a: &FieldAttrs) -> syn::Result<TokenStream> {
    let text = target.value();
    let (type_path, field) = match text.rsplit_once("::") {
        Some((head, tail)) if tail.starts_with(|c: char| c.is_lowercase() || c == '_') => (head.to_string(), Some(tail)),
        _ => (text.clone(), None),
    };
    let path: Path = syn::parse_str(&type_path).map_err(|_| syn::Error::new_spanned(target, "expected `Type` or `Type::field`"))?;

    let mut fk = quote! { ::keel_orm::ForeignKey::to::<#path>() };
    if let Some(field) = field {
        fk = quote! { #fk.field(#field) };
    }
    if let Some(action) = &a.on_delete {
        let action = referential_action(action)?;
        fk = quote! { #fk.on_delete(#action) };
    }
    if let Some(action) = &a.on_update {
        let action = referential_action(action)?;
        fk = quote! { #fk.on_update(#action) };
    }
    if let Some(name) = &a.fk_name {
        fk = quote! { #fk.name(#name) };
    }
    Ok(quote! { .foreign_key(#fk) })
}

fn referential_action(lit: &LitStr) -> syn::Result<TokenStream> {
    let variant = match lit.value().trim().to_lowercase().replace(['_', ' '], "").as_str() {
        "noaction" => "NoAction",
        "restrict" => "Restrict",
        "cascade" => "Cascade",
        "setnull" => "SetNull",
        "setdefault" => "SetDefault",
        _ => return Err(syn::Error::new_spanned(lit, "expected cascade, restrict, set_null, set_default or no_action")),
    };
    let variant = Ident::new(variant, Span::call_site());
    Ok(quote! { ::keel_orm::ReferentialAction::#variant })
}

fn row_initializers<'a>(fields: &'a [ModelField]) -> impl Iterator<Item = TokenStream> + 'a {
    fields.iter().map(|f| {
        let ident = f.ident;
        let name = &f.name;
        if f.attrs.is_transient() {
            quote! { #ident: ::core::default::Default::default(), }
        } else {
            quote! { #ident: row.get(#name)?, }
        }
    })
}

fn references_impl(struct_name: &Ident, fields: &[ModelField]) -> TokenStream {
    let mut load = Vec::new();
    let mut parents = Vec::new();
    let mut children = Vec::new();

    for f in fields.iter().filter(|f| f.attrs.reference) {
        let ident = f.ident;
        match reference_shape(&f.field.ty) {
            Some(ReferenceShape::Many(child)) => {
                load.push(quote! {
                    let found = ::keel_orm::load_many::<Self, #child>(conn, items).await?;
                    ::keel_orm::merge(items, found, |parent| &mut parent.#ident)?;
                });
                children.push(quote! {
                    let mut related = ::std::mem::take(&mut self.#ident);
                    let result = ::keel_orm::save_children(conn, &*self, &mut related).await;
                    self.#ident = related;
                    result?;
                });
            }
            Some(ReferenceShape::One(parent)) => {
                load.push(quote! {
                    let found = ::keel_orm::load_one::<Self, #parent>(conn, items).await?;
                    ::keel_orm::merge_reference(items, found, |child| &mut child.#ident)?;
                });
                parents.push(quote! {
                    if let Some(mut related) = self.#ident.take() {
                        let result = ::keel_orm::save_parent(conn, self, &mut related).await;
                        self.#ident = Some(related);
                        result?;
                    }
                });
            }
            None => {}
        }
    }

    if load.is_empty() {
        return quote! {
            impl ::keel_orm::References for #struct_name {}
        };
    }

    quote! {
        #[::keel_orm::async_trait::async_trait]
        impl ::keel_orm::References for #struct_name {
            async fn load_references(
                items: &mut [Self],
                conn: &mut ::keel_orm::DbConnection,
            ) -> Result<(), ::keel_orm::Error> {
                if items.is_empty() {
                    return Ok(());
                }
                #(#load)*
                Ok(())
            }

            async fn save_parents(&mut self, conn: &mut ::keel_orm::DbConnection) -> Result<(), ::keel_orm::Error> {
                #(#parents)*
                Ok(())
            }

            async fn save_children(&mut self, conn: &mut ::keel_orm::DbConnection) -> Result<(), ::keel_orm::Error> {
                #(#children)*
                Ok(())
            }
        }
    }
}

fn soft_delete_impl(struct_name: &Ident, fields: &[ModelField]) -> syn::Result<TokenStream> {
    let mut flagged = fields.iter().filter(|f| f.attrs.soft_delete);
    let Some(f) = flagged.next() else { return Ok(TokenStream::new()) };
    if let Some(extra) = flagged.next() {
        return Err(syn::Error::new_spanned(extra.ident, "only one field can be marked soft_delete"));
    }
    let name = &f.name;
    Ok(quote! {
        impl ::keel_orm::SoftDelete for #struct_name {
            const SOFT_DELETE_FIELD: &'static str = #name;
        }
    })
}

/// `pub mod person_fields { pub const NAME: &str = "name"; ... }`
fn fields_module(struct_name: &Ident, fields: &[ModelField]) -> TokenStream {
    let module = format_ident!("{}_fields", struct_name.to_string().to_snake_case());
    let constants = fields.iter().filter(|f| !f.attrs.ignore).map(|f| {
        let constant = format_ident!("{}", f.name.to_shouty_snake_case());
        let name = &f.name;
        quote! { pub const #constant: &str = #name; }
    });
    quote! {
        #[allow(dead_code)]
        pub mod #module {
            #(#constants)*
        }
    }
}
