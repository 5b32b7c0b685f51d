//! # Naming Strategies
//!
//! A naming strategy maps logical names (struct and field names) to the
//! physical identifiers used in SQL. Strategies are pure and never fail:
//! a name the strategy has nothing to say about passes through unchanged.
//!
//! ```rust,ignore
//! use keel_orm::naming::{AliasNaming, SnakeCaseNaming};
//!
//! let naming = AliasNaming::new(SnakeCaseNaming)
//!     .table("LegacyCustomer", "tbl_customers");
//!
//! assert_eq!(naming.table_name("OrderLine"), "order_line");
//! assert_eq!(naming.table_name("LegacyCustomer"), "tbl_customers");
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use heck::{ToLowerCamelCase, ToSnakeCase};

// ============================================================================
// Strategy Trait
// ============================================================================

/// Maps logical names to physical identifiers.
pub trait NamingStrategy: Send + Sync + Debug {
    fn table_name(&self, name: &str) -> String {
        name.to_string()
    }

    fn column_name(&self, name: &str) -> String {
        name.to_string()
    }

    fn schema_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// Shortens identifiers that exceed a length limit.
    ///
    /// The default strategy imposes no limit. Dialects with restricted
    /// identifiers apply their own cap on top of this via [`restrict_name`].
    fn apply_name_restrictions(&self, name: &str) -> String {
        name.to_string()
    }
}

impl<T: NamingStrategy + ?Sized> NamingStrategy for Arc<T> {
    fn table_name(&self, name: &str) -> String {
        (**self).table_name(name)
    }

    fn column_name(&self, name: &str) -> String {
        (**self).column_name(name)
    }

    fn schema_name(&self, name: &str) -> String {
        (**self).schema_name(name)
    }

    fn apply_name_restrictions(&self, name: &str) -> String {
        (**self).apply_name_restrictions(name)
    }
}

// ============================================================================
// Built-in Strategies
// ============================================================================

/// Logical names are used verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNaming;

impl NamingStrategy for DefaultNaming {}

/// `OrderLine` becomes `order_line`, `CustomerId` becomes `customer_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCaseNaming;

impl NamingStrategy for SnakeCaseNaming {
    fn table_name(&self, name: &str) -> String {
        name.to_snake_case()
    }

    fn column_name(&self, name: &str) -> String {
        name.to_snake_case()
    }

    fn schema_name(&self, name: &str) -> String {
        name.to_snake_case()
    }
}

/// PostgreSQL convention: lowercase with underscores, schema names included.
///
/// Identical to [`SnakeCaseNaming`] except that names already containing
/// underscores are only lowercased, so `Legacy_Table` stays `legacy_table`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowercaseUnderscoreNaming;

impl LowercaseUnderscoreNaming {
    fn convert(name: &str) -> String {
        if name.contains('_') { name.to_lowercase() } else { name.to_snake_case() }
    }
}

impl NamingStrategy for LowercaseUnderscoreNaming {
    fn table_name(&self, name: &str) -> String {
        Self::convert(name)
    }

    fn column_name(&self, name: &str) -> String {
        Self::convert(name)
    }

    fn schema_name(&self, name: &str) -> String {
        Self::convert(name)
    }
}

/// `orderLine` style column names, table names untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct CamelCaseNaming;

impl NamingStrategy for CamelCaseNaming {
    fn column_name(&self, name: &str) -> String {
        name.to_lower_camel_case()
    }
}

/// Prepends a fixed prefix to every table name.
#[derive(Debug, Clone)]
pub struct PrefixNaming<N = DefaultNaming> {
    prefix: String,
    inner: N,
}

impl PrefixNaming<DefaultNaming> {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), inner: DefaultNaming }
    }
}

impl<N: NamingStrategy> PrefixNaming<N> {
    pub fn wrap(prefix: impl Into<String>, inner: N) -> Self {
        Self { prefix: prefix.into(), inner }
    }
}

impl<N: NamingStrategy> NamingStrategy for PrefixNaming<N> {
    fn table_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, self.inner.table_name(name))
    }

    fn column_name(&self, name: &str) -> String {
        self.inner.column_name(name)
    }

    fn schema_name(&self, name: &str) -> String {
        self.inner.schema_name(name)
    }

    fn apply_name_restrictions(&self, name: &str) -> String {
        self.inner.apply_name_restrictions(name)
    }
}

/// Explicit table and column aliases, consulted before the wrapped strategy.
///
/// An aliased name is returned exactly as registered; unaliased names are
/// handed to the inner strategy.
#[derive(Debug, Clone, Default)]
pub struct AliasNaming<N = DefaultNaming> {
    inner: N,
    tables: HashMap<String, String>,
    columns: HashMap<String, String>,
}

impl<N: NamingStrategy> AliasNaming<N> {
    pub fn new(inner: N) -> Self {
        Self { inner, tables: HashMap::new(), columns: HashMap::new() }
    }

    pub fn table(mut self, logical: &str, physical: &str) -> Self {
        self.tables.insert(logical.to_string(), physical.to_string());
        self
    }

    pub fn column(mut self, logical: &str, physical: &str) -> Self {
        self.columns.insert(logical.to_string(), physical.to_string());
        self
    }
}

impl<N: NamingStrategy> NamingStrategy for AliasNaming<N> {
    fn table_name(&self, name: &str) -> String {
        match self.tables.get(name) {
            Some(alias) => alias.clone(),
            None => self.inner.table_name(name),
        }
    }

    fn column_name(&self, name: &str) -> String {
        match self.columns.get(name) {
            Some(alias) => alias.clone(),
            None => self.inner.column_name(name),
        }
    }

    fn schema_name(&self, name: &str) -> String {
        self.inner.schema_name(name)
    }

    fn apply_name_restrictions(&self, name: &str) -> String {
        self.inner.apply_name_restrictions(name)
    }
}

/// Case folding applied by [`RestrictedNaming`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseFolding {
    #[default]
    None,
    Upper,
    Lower,
}

/// Caps identifier length and optionally folds case.
///
/// Used for backends with short identifier limits. Long names are truncated
/// and suffixed with a hash of the full name so distinct inputs stay distinct.
#[derive(Debug, Clone)]
pub struct RestrictedNaming<N = DefaultNaming> {
    inner: N,
    max_length: usize,
    folding: CaseFolding,
}

impl<N: NamingStrategy> RestrictedNaming<N> {
    pub fn new(inner: N, max_length: usize) -> Self {
        Self { inner, max_length, folding: CaseFolding::None }
    }

    pub fn folding(mut self, folding: CaseFolding) -> Self {
        self.folding = folding;
        self
    }

    fn finish(&self, name: String) -> String {
        let folded = match self.folding {
            CaseFolding::None => name,
            CaseFolding::Upper => name.to_uppercase(),
            CaseFolding::Lower => name.to_lowercase(),
        };
        restrict_name(&folded, self.max_length)
    }
}

impl<N: NamingStrategy> NamingStrategy for RestrictedNaming<N> {
    fn table_name(&self, name: &str) -> String {
        self.finish(self.inner.table_name(name))
    }

    fn column_name(&self, name: &str) -> String {
        self.finish(self.inner.column_name(name))
    }

    fn schema_name(&self, name: &str) -> String {
        self.finish(self.inner.schema_name(name))
    }

    fn apply_name_restrictions(&self, name: &str) -> String {
        self.finish(self.inner.apply_name_restrictions(name))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Truncates `name` to at most `max_length` characters.
///
/// Names within the limit are returned untouched. Longer names keep a prefix
/// and end in `_` plus eight hex digits of an FNV-1a hash of the full name.
pub fn restrict_name(name: &str, max_length: usize) -> String {
    if name.chars().count() <= max_length {
        return name.to_string();
    }

    let suffix = format!("_{:08x}", fnv1a(name) as u32);
    if max_length <= suffix.len() {
        return name.chars().take(max_length).collect();
    }

    let keep = max_length - suffix.len();
    let mut out: String = name.chars().take(keep).collect();
    out.push_str(&suffix);
    out
}

fn fnv1a(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_is_idempotent() {
        let naming = SnakeCaseNaming;
        let once = naming.table_name("OrderLineItem");
        assert_eq!(once, "order_line_item");
        assert_eq!(naming.table_name(&once), once);
        assert_eq!(naming.table_name("OrderLineItem"), once);
    }

    #[test]
    fn aliases_win_over_transformation() {
        let naming = AliasNaming::new(SnakeCaseNaming)
            .table("LegacyCustomer", "TBL_CUST")
            .column("FirstName", "fname");
        assert_eq!(naming.table_name("LegacyCustomer"), "TBL_CUST");
        assert_eq!(naming.table_name("NewCustomer"), "new_customer");
        assert_eq!(naming.column_name("FirstName"), "fname");
        assert_eq!(naming.column_name("LastName"), "last_name");
    }

    #[test]
    fn prefix_applies_to_tables_only() {
        let naming = PrefixNaming::new("app_");
        assert_eq!(naming.table_name("Person"), "app_Person");
        assert_eq!(naming.column_name("Name"), "Name");
    }

    #[test]
    fn restriction_truncates_with_stable_suffix() {
        let long = "idx_customer_addresses_street_city_postcode";
        let a = restrict_name(long, 30);
        let b = restrict_name(long, 30);
        assert_eq!(a, b);
        assert_eq!(a.chars().count(), 30);
        assert!(a.starts_with("idx_customer_addre"));

        let other = restrict_name("idx_customer_addresses_street_city_country", 30);
        assert_ne!(a, other);
        assert_eq!(restrict_name("short_name", 30), "short_name");
    }

    #[test]
    fn restricted_naming_folds_case() {
        let naming = RestrictedNaming::new(DefaultNaming, 30).folding(CaseFolding::Upper);
        assert_eq!(naming.table_name("Person"), "PERSON");
    }
}
