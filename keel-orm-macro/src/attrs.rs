//! # `#[orm(...)]` Attribute Parsing
//!
//! Struct-level and field-level options, parsed with `parse_nested_meta`.

use syn::meta::ParseNestedMeta;
use syn::parse::ParseStream;
use syn::{Attribute, Ident, LitInt, LitStr, Token};

fn text(meta: &ParseNestedMeta) -> syn::Result<String> {
    Ok(meta.value()?.parse::<LitStr>()?.value())
}

/// A composite unique constraint or index: field names plus an optional name.
#[derive(Default)]
pub struct FieldGroup {
    pub fields: Vec<String>,
    pub name: Option<String>,
}

impl FieldGroup {
    /// Parses `("a", "b DESC", name = "idx_custom")`.
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let content;
        syn::parenthesized!(content in input);
        let mut group = FieldGroup::default();
        while !content.is_empty() {
            if content.peek(LitStr) {
                group.fields.push(content.parse::<LitStr>()?.value());
            } else {
                let key: Ident = content.parse()?;
                if key != "name" {
                    return Err(syn::Error::new(key.span(), "expected a field name string or `name = \"...\"`"));
                }
                content.parse::<Token![=]>()?;
                group.name = Some(content.parse::<LitStr>()?.value());
            }
            if !content.is_empty() {
                content.parse::<Token![,]>()?;
            }
        }
        if group.fields.is_empty() {
            return Err(content.error("at least one field is required"));
        }
        Ok(group)
    }
}

#[derive(Default)]
pub struct ModelAttrs {
    pub table: Option<String>,
    pub schema: Option<String>,
    pub no_implicit_key: bool,
    pub unique: Vec<FieldGroup>,
    pub indexes: Vec<(FieldGroup, bool)>,
    pub pre_create: Option<String>,
    pub post_create: Option<String>,
    pub pre_drop: Option<String>,
    pub post_drop: Option<String>,
}

impl ModelAttrs {
    pub fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut out = ModelAttrs::default();
        for attr in attrs.iter().filter(|a| a.path().is_ident("orm")) {
            attr.parse_nested_meta(|meta| {
                let path = &meta.path;
                if path.is_ident("table") {
                    out.table = Some(text(&meta)?);
                } else if path.is_ident("schema") {
                    out.schema = Some(text(&meta)?);
                } else if path.is_ident("no_implicit_key") {
                    out.no_implicit_key = true;
                } else if path.is_ident("unique") {
                    out.unique.push(FieldGroup::parse(meta.input)?);
                } else if path.is_ident("index") {
                    out.indexes.push((FieldGroup::parse(meta.input)?, false));
                } else if path.is_ident("unique_index") {
                    out.indexes.push((FieldGroup::parse(meta.input)?, true));
                } else if path.is_ident("pre_create") {
                    out.pre_create = Some(text(&meta)?);
                } else if path.is_ident("post_create") {
                    out.post_create = Some(text(&meta)?);
                } else if path.is_ident("pre_drop") {
                    out.pre_drop = Some(text(&meta)?);
                } else if path.is_ident("post_drop") {
                    out.post_drop = Some(text(&meta)?);
                } else {
                    return Err(meta.error("unknown model attribute"));
                }
                Ok(())
            })?;
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct FieldAttrs {
    pub primary_key: bool,
    pub auto_increment: bool,
    pub auto_id: bool,
    pub alias: Option<String>,
    pub length: Option<u32>,
    pub max_text: bool,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub default: Option<String>,
    pub custom_field: Option<String>,
    pub custom_select: Option<String>,
    pub computed: bool,
    pub unique: bool,
    pub index: bool,
    pub check: Option<String>,
    pub foreign_key: Option<LitStr>,
    pub on_delete: Option<LitStr>,
    pub on_update: Option<LitStr>,
    pub fk_name: Option<String>,
    pub ignore: bool,
    pub reference: bool,
    pub soft_delete: bool,
}

impl FieldAttrs {
    pub fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut out = FieldAttrs::default();
        for attr in attrs.iter().filter(|a| a.path().is_ident("orm")) {
            attr.parse_nested_meta(|meta| {
                let path = &meta.path;
                if path.is_ident("primary_key") {
                    out.primary_key = true;
                } else if path.is_ident("auto_increment") {
                    out.auto_increment = true;
                } else if path.is_ident("auto_id") {
                    out.auto_id = true;
                } else if path.is_ident("alias") {
                    out.alias = Some(text(&meta)?);
                } else if path.is_ident("length") || path.is_ident("size") {
                    out.length = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
                } else if path.is_ident("max_text") {
                    out.max_text = true;
                } else if path.is_ident("precision") {
                    out.precision = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
                } else if path.is_ident("scale") {
                    out.scale = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
                } else if path.is_ident("default") {
                    out.default = Some(text(&meta)?);
                } else if path.is_ident("custom_field") {
                    out.custom_field = Some(text(&meta)?);
                } else if path.is_ident("custom_select") {
                    out.custom_select = Some(text(&meta)?);
                } else if path.is_ident("computed") {
                    out.computed = true;
                } else if path.is_ident("unique") {
                    out.unique = true;
                } else if path.is_ident("index") {
                    out.index = true;
                } else if path.is_ident("check") {
                    out.check = Some(text(&meta)?);
                } else if path.is_ident("foreign_key") {
                    out.foreign_key = Some(meta.value()?.parse()?);
                } else if path.is_ident("on_delete") {
                    out.on_delete = Some(meta.value()?.parse()?);
                } else if path.is_ident("on_update") {
                    out.on_update = Some(meta.value()?.parse()?);
                } else if path.is_ident("fk_name") {
                    out.fk_name = Some(text(&meta)?);
                } else if path.is_ident("ignore") {
                    out.ignore = true;
                } else if path.is_ident("reference") {
                    out.reference = true;
                } else if path.is_ident("soft_delete") {
                    out.soft_delete = true;
                } else {
                    return Err(meta.error("unknown field attribute"));
                }
                Ok(())
            })?;
        }
        Ok(out)
    }

    /// Not a table column: skipped by the definition, defaulted when read.
    pub fn is_transient(&self) -> bool {
        self.ignore || self.reference
    }
}
