use std::sync::Arc;

use super::{Dialect, DialectCapabilities, DialectKind, IdentityFetch};
use crate::{
    Error,
    command::Command,
    model::{FieldDefinition, ModelDefinition, ReferentialAction},
    naming::{DefaultNaming, NamingStrategy},
    value::{FieldType, Value},
};

/// Oracle 12c+.
///
/// Identifiers are capped at 30 characters; longer names are truncated with
/// a hash suffix so they stay unique and deterministic.
#[derive(Debug, Clone)]
pub struct OracleDialect {
    naming: Arc<dyn NamingStrategy>,
}

impl OracleDialect {
    pub fn new() -> Self {
        Self { naming: Arc::new(DefaultNaming) }
    }

    pub fn with_naming(naming: Arc<dyn NamingStrategy>) -> Self {
        Self { naming }
    }
}

impl Default for OracleDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for OracleDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Oracle
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            schemas: true,
            cascading_foreign_keys: true,
            drop_column: true,
            composite_unique: true,
            returning_identity: false,
            bulk_load: false,
            savepoints: true,
        }
    }

    fn naming(&self) -> &dyn NamingStrategy {
        self.naming.as_ref()
    }

    fn max_name_length(&self) -> Option<usize> {
        Some(30)
    }

    fn native_type(&self, field: &FieldDefinition) -> String {
        match field.field_type {
            FieldType::Bool => "NUMBER(1)".to_string(),
            FieldType::Int8 | FieldType::UInt8 => "NUMBER(3)".to_string(),
            FieldType::Int16 | FieldType::UInt16 => "NUMBER(5)".to_string(),
            FieldType::Int32 | FieldType::EnumInt => "NUMBER(10)".to_string(),
            FieldType::UInt32 | FieldType::Int64 => "NUMBER(19)".to_string(),
            FieldType::UInt64 => "NUMBER(20)".to_string(),
            FieldType::Float => "BINARY_FLOAT".to_string(),
            FieldType::Double => "BINARY_DOUBLE".to_string(),
            FieldType::Decimal => super::decimal("NUMBER", field),
            FieldType::String if field.max_text => "CLOB".to_string(),
            FieldType::String => match field.length {
                Some(len) if len > 4000 => "CLOB".to_string(),
                _ => super::sized("VARCHAR2", field, 4000),
            },
            FieldType::Char => "CHAR(1)".to_string(),
            FieldType::Binary => "BLOB".to_string(),
            FieldType::Guid => "VARCHAR2(36)".to_string(),
            FieldType::DateTime => "TIMESTAMP".to_string(),
            FieldType::DateTimeOffset => "TIMESTAMP WITH TIME ZONE".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Time => "TIMESTAMP".to_string(),
            FieldType::Json => "CLOB".to_string(),
            FieldType::EnumString => super::sized("VARCHAR2", field, 255),
        }
    }

    fn auto_increment_definition(&self) -> &'static str {
        "GENERATED BY DEFAULT AS IDENTITY"
    }

    fn auto_increment_before_primary_key(&self) -> bool {
        true
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!(":{}", index)
    }

    fn sql_bool(&self, value: bool) -> String {
        if value { "1".to_string() } else { "0".to_string() }
    }

    fn quote_bytes(&self, bytes: &[u8]) -> String {
        format!("HEXTORAW('{}')", super::hex(bytes))
    }

    fn sql_concat(&self, parts: &[&str]) -> String {
        parts.join(" || ")
    }

    fn sql_random(&self) -> &'static str {
        "dbms_random.value"
    }

    fn sql_limit(&self, offset: Option<u64>, rows: Option<u64>) -> String {
        match (offset, rows) {
            (None, None) => String::new(),
            (None, Some(rows)) => format!("FETCH FIRST {} ROWS ONLY", rows),
            (Some(offset), Some(rows)) => format!("OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", offset, rows),
            (Some(offset), None) => format!("OFFSET {} ROWS", offset),
        }
    }

    fn identity_fetch(&self) -> IdentityFetch {
        IdentityFetch::Returning
    }

    fn returning_clause(&self, quoted_column: &str) -> String {
        format!(" RETURNING {} INTO :identity", quoted_column)
    }

    fn to_release_savepoint(&self, _name: &str) -> Option<String> {
        None
    }

    fn to_rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TO {}", name)
    }

    /// Oracle has only ON DELETE CASCADE and ON DELETE SET NULL.
    fn fk_action(&self, action: ReferentialAction, on_update: bool) -> Option<&'static str> {
        if on_update {
            return None;
        }
        match action {
            ReferentialAction::Cascade | ReferentialAction::SetNull => Some(action.as_sql()),
            _ => None,
        }
    }

    fn add_column_keyword(&self) -> &'static str {
        "ADD"
    }

    fn to_drop_table_statement(&self, def: &ModelDefinition) -> String {
        format!("DROP TABLE {} CASCADE CONSTRAINTS", self.get_quoted_table_name(def))
    }

    fn to_create_schema_statement(&self, schema: &str) -> Result<String, Error> {
        // A schema is a user in Oracle.
        Ok(format!("CREATE USER {} IDENTIFIED BY {}", self.quote_name(schema), self.quote_name(schema)))
    }

    fn to_table_exists_statement(&self, table: &str, schema: Option<&str>) -> Command {
        match schema {
            Some(owner) => Command::with_params(
                "SELECT COUNT(*) FROM ALL_TABLES WHERE OWNER = :0 AND TABLE_NAME = :1",
                vec![Value::Text(owner.to_string()), Value::Text(table.to_string())],
            ),
            None => Command::with_params(
                "SELECT COUNT(*) FROM USER_TABLES WHERE TABLE_NAME = :0",
                vec![Value::Text(table.to_string())],
            ),
        }
    }
}
