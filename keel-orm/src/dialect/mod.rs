//! # Dialects
//!
//! A [`Dialect`] is the per-backend strategy for SQL syntax: identifier
//! quoting, parameter placeholders, literal formatting, column types, DDL
//! fragments and paging.
//!
//! The trait carries the common behaviour as provided methods (the shape most
//! backends share) and each backend overrides only what differs. Generated SQL
//! is always plain text; nothing here touches a connection.
//!
//! ```rust,ignore
//! use keel_orm::dialect::{Dialect, SqliteDialect};
//!
//! let dialect = SqliteDialect::new();
//! let ddl = dialect.to_create_table_statement(&Person::model_definition());
//! assert_eq!(dialect.sql_limit(Some(10), Some(5)), "LIMIT 5 OFFSET 10");
//! ```

mod firebird;
mod mysql;
mod oracle;
mod postgres;
mod sqlite;
mod sqlserver;

use std::fmt;
use std::sync::Arc;

pub use firebird::FirebirdDialect;
pub use mysql::MySqlDialect;
pub use oracle::OracleDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;
pub use sqlserver::SqlServerDialect;

use crate::{
    Error,
    command::Command,
    model::{FieldDefinition, ModelDefinition, ReferentialAction},
    naming::{NamingStrategy, restrict_name},
    temporal,
    value::{FieldType, Value},
};

// ============================================================================
// Dialect Identification
// ============================================================================

/// The supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    Sqlite,
    Postgres,
    MySql,
    SqlServer,
    Oracle,
    Firebird,
}

impl DialectKind {
    /// Detects the backend from a connection URL scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once(':')?;
        match scheme.to_lowercase().as_str() {
            "sqlite" => Some(DialectKind::Sqlite),
            "postgres" | "postgresql" => Some(DialectKind::Postgres),
            "mysql" | "mariadb" => Some(DialectKind::MySql),
            "mssql" | "sqlserver" => Some(DialectKind::SqlServer),
            "oracle" => Some(DialectKind::Oracle),
            "firebird" => Some(DialectKind::Firebird),
            _ => None,
        }
    }

    /// Whether commands for this backend can be executed through the sqlx Any driver.
    pub fn is_executable(&self) -> bool {
        matches!(self, DialectKind::Sqlite | DialectKind::Postgres | DialectKind::MySql)
    }

    /// A default dialect instance for this backend.
    pub fn dialect(&self) -> Arc<dyn Dialect> {
        match self {
            DialectKind::Sqlite => Arc::new(SqliteDialect::new()),
            DialectKind::Postgres => Arc::new(PostgresDialect::new()),
            DialectKind::MySql => Arc::new(MySqlDialect::new()),
            DialectKind::SqlServer => Arc::new(SqlServerDialect::new()),
            DialectKind::Oracle => Arc::new(OracleDialect::new()),
            DialectKind::Firebird => Arc::new(FirebirdDialect::new()),
        }
    }

    /// A dialect instance for this backend using the given naming strategy.
    pub fn with_naming(&self, naming: Arc<dyn NamingStrategy>) -> Arc<dyn Dialect> {
        match self {
            DialectKind::Sqlite => Arc::new(SqliteDialect::with_naming(naming)),
            DialectKind::Postgres => Arc::new(PostgresDialect::with_naming(naming)),
            DialectKind::MySql => Arc::new(MySqlDialect::with_naming(naming)),
            DialectKind::SqlServer => Arc::new(SqlServerDialect::with_naming(naming)),
            DialectKind::Oracle => Arc::new(OracleDialect::with_naming(naming)),
            DialectKind::Firebird => Arc::new(FirebirdDialect::with_naming(naming)),
        }
    }
}

/// Feature flags used to skip or adjust generated SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DialectCapabilities {
    pub schemas: bool,
    pub cascading_foreign_keys: bool,
    pub drop_column: bool,
    pub composite_unique: bool,
    pub returning_identity: bool,
    pub bulk_load: bool,
    pub savepoints: bool,
}

/// What to do when an insert hits a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnConflict {
    #[default]
    Fail,
    Ignore,
    Replace,
}

/// How a backend-generated key is read back after an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityFetch {
    /// Reported by the driver with the execution result.
    LastInsertId,
    /// Appended `RETURNING` clause; the insert yields one row.
    Returning,
    /// A follow-up query on the same connection.
    Query(String),
}

// ============================================================================
// Dialect Trait
// ============================================================================

/// Per-backend SQL generation strategy.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn kind(&self) -> DialectKind;

    fn capabilities(&self) -> DialectCapabilities;

    fn naming(&self) -> &dyn NamingStrategy;

    /// Identifier length cap, if the backend has one.
    fn max_name_length(&self) -> Option<usize> {
        None
    }

    /// Native column type for a field, ignoring `custom_field` overrides.
    fn native_type(&self, field: &FieldDefinition) -> String;

    /// Keyword appended to auto-increment key columns.
    fn auto_increment_definition(&self) -> &'static str;

    // ------------------------------------------------------------------------
    // Names and quoting
    // ------------------------------------------------------------------------

    fn quote_name(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn apply_name_restrictions(&self, name: &str) -> String {
        let name = self.naming().apply_name_restrictions(name);
        match self.max_name_length() {
            Some(max) => restrict_name(&name, max),
            None => name,
        }
    }

    /// Physical table name, without schema.
    fn get_table_name(&self, def: &ModelDefinition) -> String {
        self.apply_name_restrictions(&self.naming().table_name(def.table_name()))
    }

    /// Physical column name.
    fn get_column_name(&self, field: &FieldDefinition) -> String {
        self.apply_name_restrictions(&self.naming().column_name(field.column_name()))
    }

    /// Physical schema name, if the model declares one.
    fn get_schema_name(&self, def: &ModelDefinition) -> Option<String> {
        def.schema.as_deref().map(|s| self.naming().schema_name(s))
    }

    /// Quoted, schema-qualified table name.
    ///
    /// Backends without schemas fold the schema into the table name as
    /// `schema_table`.
    fn get_quoted_table_name(&self, def: &ModelDefinition) -> String {
        let table = self.get_table_name(def);
        match self.get_schema_name(def) {
            Some(schema) if self.capabilities().schemas => {
                format!("{}.{}", self.quote_name(&schema), self.quote_name(&table))
            }
            Some(schema) => self.quote_name(&self.apply_name_restrictions(&format!("{}_{}", schema, table))),
            None => self.quote_name(&table),
        }
    }

    fn get_quoted_column_name(&self, field: &FieldDefinition) -> String {
        self.quote_name(&self.get_column_name(field))
    }

    /// Quotes an optional name. `None` stays `None`.
    fn get_quoted_name(&self, name: Option<&str>) -> Option<String> {
        name.map(|n| self.quote_name(n))
    }

    // ------------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------------

    /// Placeholder for the parameter at zero-based `index`.
    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Placeholder for a value; backends with strict typing add casts.
    fn param_for_value(&self, index: usize, _value: &Value) -> String {
        self.param_placeholder(index)
    }

    /// Placeholder for a value written to a column of the given type.
    fn param_for_type(&self, index: usize, _field_type: FieldType) -> String {
        self.param_placeholder(index)
    }

    /// Column expression used when reading a field.
    ///
    /// Backends whose driver cannot decode a native type return a cast here.
    fn select_column_expr(&self, _quoted_column: &str, _field: &FieldDefinition) -> Option<String> {
        None
    }

    // ------------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------------

    /// Column type used in DDL: the custom override if present, else the native type.
    fn column_type(&self, field: &FieldDefinition) -> String {
        match &field.custom_field {
            Some(custom) => custom.clone(),
            None => self.native_type(field),
        }
    }

    /// Whether the auto-increment keyword precedes `PRIMARY KEY`.
    fn auto_increment_before_primary_key(&self) -> bool {
        false
    }

    /// Keyword marking a nullable column. Empty for backends that reject it.
    fn null_keyword(&self) -> &'static str {
        " NULL"
    }

    // ------------------------------------------------------------------------
    // Literals and functions
    // ------------------------------------------------------------------------

    fn sql_bool(&self, value: bool) -> String {
        if value { "true".to_string() } else { "false".to_string() }
    }

    fn quote_bytes(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex(bytes))
    }

    /// Formats a value as an inline SQL literal.
    fn get_quoted_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => self.sql_bool(*v),
            Value::I16(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::F32(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::Text(v) => quote_string(v),
            Value::Bytes(v) => self.quote_bytes(v),
            Value::Uuid(v) => quote_string(&v.hyphenated().to_string()),
            Value::DateTime(v) => quote_string(&temporal::format_datetime_for(v, self.kind())),
            Value::NaiveDateTime(v) => quote_string(&temporal::format_naive_datetime_for(v, self.kind())),
            Value::Date(v) => quote_string(&temporal::format_date(v)),
            Value::Time(v) => quote_string(&temporal::format_time(v)),
        }
    }

    fn sql_concat(&self, parts: &[&str]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }

    fn sql_currency(&self, expr: &str) -> String {
        self.sql_concat(&["'$'", expr])
    }

    fn sql_cast(&self, expr: &str, sql_type: &str) -> String {
        format!("CAST({} AS {})", expr, sql_type)
    }

    fn sql_random(&self) -> &'static str {
        "RAND()"
    }

    /// Formats a literal list for an IN clause.
    ///
    /// An empty list renders `(NULL)` so the predicate stays valid and never matches.
    fn sql_spread(&self, values: &[Value]) -> String {
        if values.is_empty() {
            return "(NULL)".to_string();
        }
        let items: Vec<String> = values.iter().map(|v| self.get_quoted_value(v)).collect();
        format!("({})", items.join(","))
    }

    /// Paging clause, composed after ORDER BY.
    fn sql_limit(&self, offset: Option<u64>, rows: Option<u64>) -> String {
        match (offset, rows) {
            (None, None) => String::new(),
            (None, Some(rows)) => format!("LIMIT {}", rows),
            (Some(offset), Some(rows)) => format!("LIMIT {} OFFSET {}", rows, offset),
            (Some(offset), None) => format!("LIMIT {} OFFSET {}", i64::MAX, offset),
        }
    }

    /// Whether OFFSET/FETCH paging needs an ORDER BY to be valid.
    fn paging_requires_order_by(&self) -> bool {
        false
    }

    /// Rewrites an INSERT for the requested conflict behaviour.
    fn sql_conflict(&self, _def: &ModelDefinition, sql: &str, on_conflict: OnConflict) -> Result<String, Error> {
        match on_conflict {
            OnConflict::Fail => Ok(sql.to_string()),
            other => Err(Error::Unsupported(format!("{:?} on conflict for {:?}", other, self.kind()))),
        }
    }

    // ------------------------------------------------------------------------
    // Identity and transactions
    // ------------------------------------------------------------------------

    fn identity_fetch(&self) -> IdentityFetch {
        IdentityFetch::LastInsertId
    }

    fn returning_clause(&self, quoted_column: &str) -> String {
        format!(" RETURNING {}", quoted_column)
    }

    fn begin_transaction_sql(&self) -> &'static str {
        "BEGIN"
    }

    fn commit_sql(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback_sql(&self) -> &'static str {
        "ROLLBACK"
    }

    fn to_savepoint(&self, name: &str) -> String {
        format!("SAVEPOINT {}", name)
    }

    fn to_release_savepoint(&self, name: &str) -> Option<String> {
        Some(format!("RELEASE SAVEPOINT {}", name))
    }

    fn to_rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", name)
    }

    // ------------------------------------------------------------------------
    // DDL
    // ------------------------------------------------------------------------

    /// The SQL for a referential action, or `None` to omit the clause.
    fn fk_action(&self, action: ReferentialAction, _on_update: bool) -> Option<&'static str> {
        match action {
            ReferentialAction::NoAction => None,
            other => Some(other.as_sql()),
        }
    }

    /// One column definition as used in CREATE TABLE and ADD COLUMN.
    fn get_column_definition(&self, def: &ModelDefinition, field: &FieldDefinition) -> String {
        let mut sql = format!("{} {}", self.get_quoted_column_name(field), self.column_type(field));

        if field.primary_key && !def.has_composite_key() {
            let auto = if field.auto_increment { self.auto_increment_definition() } else { "" };
            if !auto.is_empty() && self.auto_increment_before_primary_key() {
                sql.push(' ');
                sql.push_str(auto);
            }
            sql.push_str(" PRIMARY KEY");
            if !auto.is_empty() && !self.auto_increment_before_primary_key() {
                sql.push(' ');
                sql.push_str(auto);
            }
        } else if field.nullable {
            sql.push_str(self.null_keyword());
        } else {
            sql.push_str(" NOT NULL");
        }

        if field.unique && !field.index && !field.primary_key {
            sql.push_str(" UNIQUE");
        }

        if let Some(default) = &field.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }

        if let Some(check) = &field.check {
            let name = self.apply_name_restrictions(&check_constraint_name(self, def, field));
            sql.push_str(&format!(" CONSTRAINT {} CHECK ({})", name, check));
        }

        sql
    }

    fn to_create_table_statement(&self, def: &ModelDefinition) -> String {
        let table = self.get_quoted_table_name(def);
        let mut parts: Vec<String> = def
            .fields
            .iter()
            .filter(|f| f.is_created())
            .map(|f| self.get_column_definition(def, f))
            .collect();

        if def.has_composite_key() {
            let keys: Vec<String> = def.primary_keys().iter().map(|f| self.get_quoted_column_name(f)).collect();
            parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }

        for unique in &def.unique_constraints {
            if unique.fields.len() > 1 && !self.capabilities().composite_unique {
                log::warn!("{:?} cannot express composite unique constraints; skipping on {}", self.kind(), def.name);
                continue;
            }
            let columns: Vec<String> = unique
                .fields
                .iter()
                .map(|name| match def.get_field(name) {
                    Some(field) => self.get_quoted_column_name(field),
                    None => self.quote_name(&self.naming().column_name(name)),
                })
                .collect();
            let name = match &unique.name {
                Some(name) => name.clone(),
                None => format!("UC_{}_{}", self.get_table_name(def), unique.fields.join("_")),
            };
            parts.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                self.apply_name_restrictions(&name),
                columns.join(", ")
            ));
        }

        for field in def.fields.iter().filter(|f| f.is_created()) {
            let Some(fk) = &field.foreign_key else { continue };
            let target = fk.model.definition();
            let target_field = match &fk.field {
                Some(name) => target.get_field(name),
                None => target.primary_key(),
            };
            let target_column = match target_field {
                Some(f) => self.get_quoted_column_name(f),
                None => self.quote_name(&self.naming().column_name(fk.field.as_deref().unwrap_or("id"))),
            };
            let name = match &fk.name {
                Some(name) => name.clone(),
                None => format!(
                    "FK_{}_{}_{}",
                    self.get_table_name(def),
                    self.get_table_name(&target),
                    self.get_column_name(field)
                ),
            };

            let mut clause = format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                self.apply_name_restrictions(&name),
                self.get_quoted_column_name(field),
                self.get_quoted_table_name(&target),
                target_column
            );
            if let Some(action) = self.fk_action(fk.on_delete, false) {
                clause.push_str(" ON DELETE ");
                clause.push_str(action);
            }
            if let Some(action) = self.fk_action(fk.on_update, true) {
                clause.push_str(" ON UPDATE ");
                clause.push_str(action);
            }
            parts.push(clause);
        }

        format!("CREATE TABLE {} \n(\n  {}\n)", table, parts.join(",\n  "))
    }

    /// Index name: `idx_<table>_<cols>` or `uidx_<table>_<cols>`, lowercased.
    fn get_index_name(&self, def: &ModelDefinition, unique: bool, columns: &[String]) -> String {
        let prefix = if unique { "uidx" } else { "idx" };
        let name = format!("{}_{}_{}", prefix, self.get_table_name(def), columns.join("_")).to_lowercase();
        self.apply_name_restrictions(&name)
    }

    fn to_create_index_statements(&self, def: &ModelDefinition) -> Vec<String> {
        let table = self.get_quoted_table_name(def);
        let mut statements = Vec::new();

        for field in def.fields.iter().filter(|f| f.index && f.is_created()) {
            let column = self.get_column_name(field);
            let name = self.get_index_name(def, field.unique, std::slice::from_ref(&column));
            statements.push(create_index_sql(field.unique, &name, &table, &self.quote_name(&column)));
        }

        for index in &def.composite_indexes {
            let mut names = Vec::new();
            let mut columns = Vec::new();
            for entry in &index.fields {
                let (field_name, desc) = split_order(entry);
                let column = match def.get_field(field_name) {
                    Some(field) => self.get_column_name(field),
                    None => self.naming().column_name(field_name),
                };
                columns.push(if desc { format!("{} DESC", self.quote_name(&column)) } else { self.quote_name(&column) });
                names.push(column);
            }
            let name = match &index.name {
                Some(name) => self.apply_name_restrictions(name),
                None => self.get_index_name(def, index.unique, &names),
            };
            statements.push(create_index_sql(index.unique, &name, &table, &columns.join(", ")));
        }

        statements
    }

    fn to_drop_table_statement(&self, def: &ModelDefinition) -> String {
        format!("DROP TABLE {}", self.get_quoted_table_name(def))
    }

    fn add_column_keyword(&self) -> &'static str {
        "ADD COLUMN"
    }

    fn to_add_column_statement(&self, def: &ModelDefinition, field: &FieldDefinition) -> String {
        format!(
            "ALTER TABLE {} {} {}",
            self.get_quoted_table_name(def),
            self.add_column_keyword(),
            self.get_column_definition(def, field)
        )
    }

    fn to_drop_column_statement(&self, def: &ModelDefinition, column: &str) -> Result<String, Error> {
        if !self.capabilities().drop_column {
            return Err(Error::unsupported("DROP COLUMN"));
        }
        Ok(format!("ALTER TABLE {} DROP COLUMN {}", self.get_quoted_table_name(def), self.quote_name(column)))
    }

    fn to_rename_column_statement(&self, def: &ModelDefinition, old: &str, new: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.get_quoted_table_name(def),
            self.quote_name(old),
            self.quote_name(new)
        )
    }

    fn to_create_schema_statement(&self, schema: &str) -> Result<String, Error> {
        if !self.capabilities().schemas {
            return Err(Error::unsupported("CREATE SCHEMA"));
        }
        Ok(format!("CREATE SCHEMA {}", self.quote_name(&self.naming().schema_name(schema))))
    }

    /// A query returning a single count, non-zero when the table exists.
    fn to_table_exists_statement(&self, table: &str, schema: Option<&str>) -> Command;

    // ------------------------------------------------------------------------
    // Bulk insert
    // ------------------------------------------------------------------------

    /// Multi-row INSERT with literal values.
    ///
    /// Each row holds the values of [`insert_fields`] in order. An empty row
    /// set renders an empty string.
    fn to_insert_rows_sql(&self, def: &ModelDefinition, rows: &[Vec<Value>]) -> String {
        if rows.is_empty() {
            return String::new();
        }
        let columns: Vec<String> = insert_fields(def).iter().map(|f| self.get_quoted_column_name(f)).collect();
        let values: Vec<String> = rows
            .iter()
            .map(|row| {
                let literals: Vec<String> = row.iter().map(|v| self.get_quoted_value(v)).collect();
                format!("({})", literals.join(","))
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES\n{};",
            self.get_quoted_table_name(def),
            columns.join(","),
            values.join(",\n")
        )
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Fields written by an INSERT: writable and not backend-generated.
pub fn insert_fields(def: &ModelDefinition) -> Vec<&FieldDefinition> {
    def.fields.iter().filter(|f| f.is_writable() && !f.auto_increment).collect()
}

/// Single-quotes a string literal, doubling embedded quotes.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

fn check_constraint_name<D: Dialect + ?Sized>(dialect: &D, def: &ModelDefinition, field: &FieldDefinition) -> String {
    match dialect.get_schema_name(def) {
        Some(schema) => format!("CHK_{}_{}_{}", schema, dialect.get_table_name(def), dialect.get_column_name(field)),
        None => format!("CHK_{}_{}", dialect.get_table_name(def), dialect.get_column_name(field)),
    }
}

fn create_index_sql(unique: bool, name: &str, table: &str, columns: &str) -> String {
    let kind = if unique { "UNIQUE INDEX" } else { "INDEX" };
    format!("CREATE {} {} ON {} ({})", kind, name, table, columns)
}

/// Splits `"field DESC"` into the field name and a descending flag.
fn split_order(entry: &str) -> (&str, bool) {
    let trimmed = entry.trim();
    let upper = trimmed.to_uppercase();
    if upper.ends_with(" DESC") {
        (trimmed[..trimmed.len() - 5].trim_end(), true)
    } else if upper.ends_with(" ASC") {
        (trimmed[..trimmed.len() - 4].trim_end(), false)
    } else {
        (trimmed, false)
    }
}

/// String type with an explicit or default length.
pub(crate) fn sized(base: &str, field: &FieldDefinition, default_len: u32) -> String {
    format!("{}({})", base, field.length.unwrap_or(default_len))
}

pub(crate) fn decimal(base: &str, field: &FieldDefinition) -> String {
    let (precision, scale) = field.precision.unwrap_or((38, 6));
    format!("{}({},{})", base, precision, scale)
}

#[cfg(test)]
mod tests;
