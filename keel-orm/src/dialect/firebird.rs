use std::sync::Arc;

use super::{Dialect, DialectCapabilities, DialectKind, IdentityFetch};
use crate::{
    Error,
    command::Command,
    model::{FieldDefinition, ModelDefinition, ReferentialAction},
    naming::{DefaultNaming, NamingStrategy},
    value::{FieldType, Value},
};

/// Firebird 3+ (native BOOLEAN and identity columns).
#[derive(Debug, Clone)]
pub struct FirebirdDialect {
    naming: Arc<dyn NamingStrategy>,
}

impl FirebirdDialect {
    pub fn new() -> Self {
        Self { naming: Arc::new(DefaultNaming) }
    }

    pub fn with_naming(naming: Arc<dyn NamingStrategy>) -> Self {
        Self { naming }
    }
}

impl Default for FirebirdDialect {
    fn default() -> Self {
        Self::new()
    }
}

/// Firebird numerics top out at 18 digits.
const MAX_PRECISION: u8 = 18;

impl Dialect for FirebirdDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Firebird
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

    fn max_name_length(&self) -> Option<usize> {
        Some(31)
    }

    fn native_type(&self, field: &FieldDefinition) -> String {
        match field.field_type {
            FieldType::Bool => "BOOLEAN".to_string(),
            FieldType::Int8 | FieldType::UInt8 | FieldType::Int16 => "SMALLINT".to_string(),
            FieldType::UInt16 | FieldType::Int32 | FieldType::EnumInt => "INTEGER".to_string(),
            FieldType::UInt32 | FieldType::Int64 => "BIGINT".to_string(),
            FieldType::UInt64 => "DECIMAL(18,0)".to_string(),
            FieldType::Float => "FLOAT".to_string(),
            FieldType::Double => "DOUBLE PRECISION".to_string(),
            FieldType::Decimal => {
                let (precision, scale) = field.precision.unwrap_or((MAX_PRECISION, 6));
                let precision = precision.min(MAX_PRECISION);
                format!("DECIMAL({},{})", precision, scale.min(precision))
            }
            FieldType::String if field.max_text => "BLOB SUB_TYPE TEXT".to_string(),
            FieldType::String => super::sized("VARCHAR", field, 255),
            FieldType::Char => "CHAR(1)".to_string(),
            FieldType::Binary => "BLOB".to_string(),
            FieldType::Guid => "CHAR(36)".to_string(),
            FieldType::DateTime | FieldType::DateTimeOffset => "TIMESTAMP".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Time => "TIME".to_string(),
            FieldType::Json => "BLOB SUB_TYPE TEXT".to_string(),
            FieldType::EnumString => super::sized("VARCHAR", field, 255),
        }
    }

    fn auto_increment_definition(&self) -> &'static str {
        "GENERATED BY DEFAULT AS IDENTITY"
    }

    fn auto_increment_before_primary_key(&self) -> bool {
        true
    }

    /// Firebird rejects an explicit `NULL` column constraint.
    fn null_keyword(&self) -> &'static str {
        ""
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@{}", index)
    }

    fn sql_concat(&self, parts: &[&str]) -> String {
        parts.join(" || ")
    }

    fn sql_limit(&self, offset: Option<u64>, rows: Option<u64>) -> String {
        match (offset, rows) {
            (None, None) => String::new(),
            (None, Some(rows)) => format!("ROWS {}", rows),
            (Some(offset), Some(rows)) => {
                format!("ROWS {} TO {}", offset.saturating_add(1), offset.saturating_add(rows))
            }
            (Some(offset), None) => format!("ROWS {} TO {}", offset.saturating_add(1), i64::MAX),
        }
    }

    fn identity_fetch(&self) -> IdentityFetch {
        IdentityFetch::Returning
    }

    fn fk_action(&self, action: ReferentialAction, _on_update: bool) -> Option<&'static str> {
        match action {
            ReferentialAction::NoAction | ReferentialAction::Restrict => None,
            other => Some(other.as_sql()),
        }
    }

    fn add_column_keyword(&self) -> &'static str {
        "ADD"
    }

    fn to_drop_column_statement(&self, def: &ModelDefinition, column: &str) -> Result<String, Error> {
        Ok(format!("ALTER TABLE {} DROP {}", self.get_quoted_table_name(def), self.quote_name(column)))
    }

    fn to_rename_column_statement(&self, def: &ModelDefinition, old: &str, new: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} TO {}",
            self.get_quoted_table_name(def),
            self.quote_name(old),
            self.quote_name(new)
        )
    }

    fn to_table_exists_statement(&self, table: &str, _schema: Option<&str>) -> Command {
        Command::with_params(
            "SELECT COUNT(*) FROM RDB$RELATIONS WHERE RDB$SYSTEM_FLAG = 0 AND RDB$RELATION_NAME = @0",
            vec![Value::Text(table.to_string())],
        )
    }
}
