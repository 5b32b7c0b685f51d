//! # Type Inspection
//!
//! Syntactic checks on field types. Column types themselves are resolved by
//! the `DbType` trait at compile time of the user crate; the macro only needs
//! to see through `Option<T>` and `Vec<T>` for reference fields.

use syn::{GenericArgument, PathArguments, Type};

/// The `T` of `Wrapper<T>` when the last path segment is `wrapper`.
fn single_generic<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else { return None };
    let segment = type_path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else { return None };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

pub fn option_inner(ty: &Type) -> Option<&Type> {
    single_generic(ty, "Option")
}

pub fn vec_inner(ty: &Type) -> Option<&Type> {
    single_generic(ty, "Vec")
}

/// How a `#[orm(reference)]` field holds related rows.
pub enum ReferenceShape<'a> {
    /// `Vec<Child>`: children whose foreign key points here.
    Many(&'a Type),
    /// `Option<Parent>`: the parent this row's foreign key points at.
    One(&'a Type),
}

pub fn reference_shape(ty: &Type) -> Option<ReferenceShape<'_>> {
    if let Some(inner) = vec_inner(ty) {
        return Some(ReferenceShape::Many(inner));
    }
    option_inner(ty).map(ReferenceShape::One)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn sees_through_wrappers() {
        let ty: Type = parse_quote!(Option<String>);
        assert!(option_inner(&ty).is_some());
        let ty: Type = parse_quote!(std::vec::Vec<Pet>);
        assert!(vec_inner(&ty).is_some());
        let ty: Type = parse_quote!(i64);
        assert!(option_inner(&ty).is_none());
        assert!(reference_shape(&ty).is_none());
    }
}
