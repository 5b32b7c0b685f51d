use std::sync::Arc;

use super::{Dialect, DialectCapabilities, DialectKind, IdentityFetch, OnConflict};
use crate::{
    Error,
    command::Command,
    model::{FieldDefinition, ModelDefinition},
    naming::{DefaultNaming, NamingStrategy},
    value::{FieldType, Value},
};

/// SQLite 3.35+.
#[derive(Debug, Clone)]
pub struct SqliteDialect {
    naming: Arc<dyn NamingStrategy>,
}

impl SqliteDialect {
    pub fn new() -> Self {
        Self { naming: Arc::new(DefaultNaming) }
    }

    pub fn with_naming(naming: Arc<dyn NamingStrategy>) -> Self {
        Self { naming }
    }
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            schemas: false,
            cascading_foreign_keys: true,
            drop_column: true,
            composite_unique: true,
            returning_identity: true,
            bulk_load: false,
            savepoints: true,
        }
    }

    fn naming(&self) -> &dyn NamingStrategy {
        self.naming.as_ref()
    }

    fn native_type(&self, field: &FieldDefinition) -> String {
        match field.field_type {
            FieldType::Bool
            | FieldType::Int8
            | FieldType::Int16
            | FieldType::Int32
            | FieldType::Int64
            | FieldType::UInt8
            | FieldType::UInt16
            | FieldType::UInt32
            | FieldType::UInt64
            | FieldType::EnumInt => "INTEGER".to_string(),
            FieldType::Float | FieldType::Double => "REAL".to_string(),
            FieldType::Decimal => super::decimal("NUMERIC", field),
            FieldType::String if field.max_text => "TEXT".to_string(),
            FieldType::String => super::sized("VARCHAR", field, 8000),
            FieldType::Char => "CHAR(1)".to_string(),
            FieldType::Binary => "BLOB".to_string(),
            FieldType::Guid => "CHAR(36)".to_string(),
            FieldType::DateTime | FieldType::DateTimeOffset => "DATETIME".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Time => "TIME".to_string(),
            FieldType::Json => "TEXT".to_string(),
            FieldType::EnumString => super::sized("VARCHAR", field, 255),
        }
    }

    fn auto_increment_definition(&self) -> &'static str {
        "AUTOINCREMENT"
    }

    // The driver types columns by their declared type and cannot decode
    // DATE, TIME or DATETIME; a cast expression is read as plain text.
    fn select_column_expr(&self, quoted_column: &str, field: &FieldDefinition) -> Option<String> {
        match field.field_type {
            FieldType::DateTime | FieldType::DateTimeOffset | FieldType::Date | FieldType::Time => {
                Some(format!("CAST({} AS TEXT)", quoted_column))
            }
            _ => None,
        }
    }

    fn sql_bool(&self, value: bool) -> String {
        if value { "1".to_string() } else { "0".to_string() }
    }

    fn sql_concat(&self, parts: &[&str]) -> String {
        parts.join(" || ")
    }

    fn sql_random(&self) -> &'static str {
        "RANDOM()"
    }

    fn sql_conflict(&self, _def: &ModelDefinition, sql: &str, on_conflict: OnConflict) -> Result<String, Error> {
        let verb = match on_conflict {
            OnConflict::Fail => return Ok(sql.to_string()),
            OnConflict::Ignore => "INSERT OR IGNORE",
            OnConflict::Replace => "INSERT OR REPLACE",
        };
        match sql.strip_prefix("INSERT") {
            Some(rest) => Ok(format!("{}{}", verb, rest)),
            None => Err(Error::invalid_argument("conflict resolution only applies to INSERT")),
        }
    }

    fn identity_fetch(&self) -> IdentityFetch {
        IdentityFetch::Returning
    }

    fn to_table_exists_statement(&self, table: &str, _schema: Option<&str>) -> Command {
        Command::with_params(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            vec![Value::Text(table.to_string())],
        )
    }
}

