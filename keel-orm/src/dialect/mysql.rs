use std::sync::Arc;

use super::{Dialect, DialectCapabilities, DialectKind, IdentityFetch, OnConflict};
use crate::{
    Error,
    command::Command,
    model::{FieldDefinition, ModelDefinition},
    naming::{DefaultNaming, NamingStrategy},
    value::{FieldType, Value},
};

/// MySQL 8 and MariaDB 10.5+.
#[derive(Debug, Clone)]
pub struct MySqlDialect {
    naming: Arc<dyn NamingStrategy>,
}

impl MySqlDialect {
    pub fn new() -> Self {
        Self { naming: Arc::new(DefaultNaming) }
    }

    pub fn with_naming(naming: Arc<dyn NamingStrategy>) -> Self {
        Self { naming }
    }
}

impl Default for MySqlDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for MySqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            schemas: false,
            cascading_foreign_keys: true,
            drop_column: true,
            composite_unique: true,
            returning_identity: false,
            bulk_load: true,
            savepoints: true,
        }
    }

    fn naming(&self) -> &dyn NamingStrategy {
        self.naming.as_ref()
    }

    fn max_name_length(&self) -> Option<usize> {
        Some(64)
    }

    fn quote_name(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn native_type(&self, field: &FieldDefinition) -> String {
        match field.field_type {
            FieldType::Bool => "TINYINT(1)".to_string(),
            FieldType::Int8 => "TINYINT".to_string(),
            FieldType::Int16 => "SMALLINT".to_string(),
            FieldType::Int32 | FieldType::EnumInt => "INT".to_string(),
            FieldType::Int64 => "BIGINT".to_string(),
            FieldType::UInt8 => "TINYINT UNSIGNED".to_string(),
            FieldType::UInt16 => "SMALLINT UNSIGNED".to_string(),
            FieldType::UInt32 => "INT UNSIGNED".to_string(),
            FieldType::UInt64 => "BIGINT UNSIGNED".to_string(),
            FieldType::Float => "FLOAT".to_string(),
            FieldType::Double => "DOUBLE".to_string(),
            FieldType::Decimal => super::decimal("DECIMAL", field),
            FieldType::String if field.max_text => "LONGTEXT".to_string(),
            FieldType::String => super::sized("VARCHAR", field, 255),
            FieldType::Char => "CHAR(1)".to_string(),
            FieldType::Binary => "LONGBLOB".to_string(),
            FieldType::Guid => "CHAR(36)".to_string(),
            FieldType::DateTime | FieldType::DateTimeOffset => "DATETIME(6)".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Time => "TIME".to_string(),
            FieldType::Json => "LONGTEXT".to_string(),
            FieldType::EnumString => super::sized("VARCHAR", field, 255),
        }
    }

    fn auto_increment_definition(&self) -> &'static str {
        "AUTO_INCREMENT"
    }

    fn select_column_expr(&self, quoted_column: &str, field: &FieldDefinition) -> Option<String> {
        match field.field_type {
            FieldType::DateTime
            | FieldType::DateTimeOffset
            | FieldType::Date
            | FieldType::Time
            | FieldType::UInt64 => Some(format!("CAST({} AS CHAR)", quoted_column)),
            FieldType::UInt8 | FieldType::UInt16 | FieldType::UInt32 => {
                Some(format!("CAST({} AS SIGNED)", quoted_column))
            }
            FieldType::Decimal => Some(format!("CAST({} AS DOUBLE)", quoted_column)),
            _ => None,
        }
    }

    fn sql_bool(&self, value: bool) -> String {
        if value { "1".to_string() } else { "0".to_string() }
    }

    fn sql_currency(&self, expr: &str) -> String {
        format!("CONCAT('$', cast({} as decimal(15,2)))", expr)
    }

    fn sql_cast(&self, expr: &str, sql_type: &str) -> String {
        // MySQL only casts to a fixed set of target types.
        let target = match sql_type.to_uppercase().as_str() {
            "TEXT" | "VARCHAR" | "STRING" => "CHAR".to_string(),
            "INTEGER" | "INT" | "BIGINT" => "SIGNED".to_string(),
            _ => sql_type.to_string(),
        };
        format!("CAST({} AS {})", expr, target)
    }

    fn sql_conflict(&self, _def: &ModelDefinition, sql: &str, on_conflict: OnConflict) -> Result<String, Error> {
        let verb = match on_conflict {
            OnConflict::Fail => return Ok(sql.to_string()),
            OnConflict::Ignore => "INSERT IGNORE",
            OnConflict::Replace => "REPLACE",
        };
        match sql.strip_prefix("INSERT") {
            Some(rest) => Ok(format!("{}{}", verb, rest)),
            None => Err(Error::invalid_argument("conflict resolution only applies to INSERT")),
        }
    }

    fn identity_fetch(&self) -> IdentityFetch {
        IdentityFetch::LastInsertId
    }

    fn to_table_exists_statement(&self, table: &str, _schema: Option<&str>) -> Command {
        Command::with_params(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?",
            vec![Value::Text(table.to_string())],
        )
    }
}
