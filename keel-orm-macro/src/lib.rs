//! # Keel ORM Procedural Macros
//!
//! Derive macros re-exported by `keel-orm`; depend on that crate instead.
//!
//! - **`Model`** (`derive_model.rs`): table models
//! - **`FromRow`** (`derive_row.rs`): projection types read from query results
//! - **`SqlEnum`** (`derive_enum.rs`): fieldless enums stored as text or integers
//!
//! ## Model attributes
//!
//! On the struct:
//!
//! ```rust,ignore
//! #[derive(Model)]
//! #[orm(table = "people", schema = "crm")]
//! #[orm(unique("first_name", "last_name", name = "UC_person_name"))]
//! #[orm(index("age", "name DESC"), unique_index("email"))]
//! #[orm(post_create = "INSERT INTO people (name) VALUES ('root')")]
//! struct Person { /* ... */ }
//! ```
//!
//! | Attribute | Effect |
//! |-----------|--------|
//! | `table = "..."` | physical table name |
//! | `schema = "..."` | schema (folded into the table name where unsupported) |
//! | `no_implicit_key` | a field named `id` is not the key by default |
//! | `unique(...)` | composite unique constraint |
//! | `index(...)` / `unique_index(...)` | composite index |
//! | `pre_create`, `post_create`, `pre_drop`, `post_drop` | SQL run around DDL |
//!
//! On fields:
//!
//! ```rust,ignore
//! #[orm(primary_key, auto_increment)]
//! id: i64,
//! #[orm(length = 100, unique)]
//! email: String,
//! #[orm(precision = 10, scale = 2, check = "price >= 0")]
//! price: f64,
//! #[orm(foreign_key = "Owner", on_delete = "cascade")]
//! owner_id: i64,
//! #[orm(reference)]
//! owner: Option<Owner>,
//! #[orm(soft_delete)]
//! is_deleted: bool,
//! ```
//!
//! | Attribute | Effect |
//! |-----------|--------|
//! | `primary_key`, `auto_increment`, `auto_id` | key and identity strategy |
//! | `alias = "..."` | physical column name |
//! | `length = N` (or `size`), `max_text` | string sizing |
//! | `precision = P, scale = S` | decimal column |
//! | `default = "sql"` | column default, used when the value is NULL |
//! | `custom_field = "sql type"` | column type used verbatim |
//! | `custom_select = "sql"` | selected expression; not created or written |
//! | `computed` | created, read, never written |
//! | `unique`, `index`, `check = "expr"` | single-column constraints |
//! | `foreign_key = "Type"` or `"Type::field"` | with `on_delete`, `on_update`, `fk_name` |
//! | `reference` | `Vec<Child>` or `Option<Parent>` loaded by `load_select` |
//! | `soft_delete` | logical deletion flag |
//! | `ignore` | not persisted; `Default` when read |
//!
//! ## Generated field constants
//!
//! ```rust,ignore
//! pub mod person_fields {
//!     pub const ID: &str = "id";
//!     pub const EMAIL: &str = "email";
//! }
//!
//! conn.select(&conn.from::<Person>().filter(col(person_fields::EMAIL).ends_with("@example.com"))).await?;
//! ```

mod attrs;
mod derive_enum;
mod derive_model;
mod derive_row;
mod types;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derives `Model`, `FromDataRow`, `References`, and `SoftDelete` when a
/// field is marked `#[orm(soft_delete)]`.
#[proc_macro_derive(Model, attributes(orm))]
pub fn model_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    derive_model::expand(ast).unwrap_or_else(syn::Error::into_compile_error).into()
}

/// Derives `FromDataRow` for a projection struct.
///
/// ```rust,ignore
/// #[derive(FromRow)]
/// struct AgeGroup {
///     age: i32,
///     #[orm(alias = "n")]
///     count: i64,
/// }
///
/// let q = conn.from::<Person>()
///     .select([col("age"), Sql::as_(Sql::count_all(), "n")])
///     .group_by([col("age")]);
/// let groups: Vec<AgeGroup> = conn.select_as(&q).await?;
/// ```
#[proc_macro_derive(FromRow, attributes(orm))]
pub fn from_row_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    derive_row::expand(ast).unwrap_or_else(syn::Error::into_compile_error).into()
}

/// Derives `DbType`, `ToValue` and `FromValue` for a fieldless enum.
///
/// ```rust,ignore
/// #[derive(SqlEnum, Debug, Clone, Copy, PartialEq)]
/// enum Status {
///     Active,
///     #[orm(rename = "on_hold")]
///     OnHold,
/// }
///
/// #[derive(SqlEnum, Debug, Clone, Copy, PartialEq)]
/// #[orm(as_int)]
/// enum Priority {
///     Low = 1,
///     High = 10,
/// }
/// ```
#[proc_macro_derive(SqlEnum, attributes(orm))]
pub fn sql_enum_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    derive_enum::expand(ast).unwrap_or_else(syn::Error::into_compile_error).into()
}
