use std::sync::Arc;

use super::{Dialect, DialectCapabilities, DialectKind, IdentityFetch};
use crate::{
    command::Command,
    model::{FieldDefinition, ModelDefinition, ReferentialAction},
    naming::{DefaultNaming, NamingStrategy},
    value::{FieldType, Value},
};

/// SQL Server 2012+ (OFFSET/FETCH paging).
///
/// SQL generation only; there is no sqlx driver for it.
#[derive(Debug, Clone)]
pub struct SqlServerDialect {
    naming: Arc<dyn NamingStrategy>,
}

impl SqlServerDialect {
    pub fn new() -> Self {
        Self { naming: Arc::new(DefaultNaming) }
    }

    pub fn with_naming(naming: Arc<dyn NamingStrategy>) -> Self {
        Self { naming }
    }
}

impl Default for SqlServerDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for SqlServerDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            schemas: true,
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
        Some(128)
    }

    fn quote_name(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn native_type(&self, field: &FieldDefinition) -> String {
        match field.field_type {
            FieldType::Bool => "BIT".to_string(),
            FieldType::Int8 | FieldType::Int16 => "SMALLINT".to_string(),
            FieldType::UInt8 => "TINYINT".to_string(),
            FieldType::UInt16 | FieldType::Int32 | FieldType::EnumInt => "INT".to_string(),
            FieldType::UInt32 | FieldType::Int64 => "BIGINT".to_string(),
            FieldType::UInt64 => "DECIMAL(20,0)".to_string(),
            FieldType::Float => "REAL".to_string(),
            FieldType::Double => "FLOAT".to_string(),
            FieldType::Decimal => super::decimal("DECIMAL", field),
            FieldType::String if field.max_text => "NVARCHAR(MAX)".to_string(),
            FieldType::String => match field.length {
                Some(len) if len > 4000 => "NVARCHAR(MAX)".to_string(),
                _ => super::sized("NVARCHAR", field, 4000),
            },
            FieldType::Char => "NCHAR(1)".to_string(),
            FieldType::Binary => "VARBINARY(MAX)".to_string(),
            FieldType::Guid => "UNIQUEIDENTIFIER".to_string(),
            FieldType::DateTime => "DATETIME2".to_string(),
            FieldType::DateTimeOffset => "DATETIMEOFFSET".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Time => "TIME".to_string(),
            FieldType::Json => "NVARCHAR(MAX)".to_string(),
            FieldType::EnumString => super::sized("VARCHAR", field, 255),
        }
    }

    fn auto_increment_definition(&self) -> &'static str {
        "IDENTITY(1,1)"
    }

    fn auto_increment_before_primary_key(&self) -> bool {
        true
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@{}", index)
    }

    fn sql_bool(&self, value: bool) -> String {
        if value { "1".to_string() } else { "0".to_string() }
    }

    fn quote_bytes(&self, bytes: &[u8]) -> String {
        format!("0x{}", super::hex(bytes))
    }

    fn sql_currency(&self, expr: &str) -> String {
        self.sql_concat(&["'$'", &format!("CONVERT(VARCHAR, CONVERT(MONEY, {}), 1)", expr)])
    }

    fn sql_random(&self) -> &'static str {
        "NEWID()"
    }

    fn sql_limit(&self, offset: Option<u64>, rows: Option<u64>) -> String {
        match (offset, rows) {
            (None, None) => String::new(),
            (None, Some(rows)) => format!("OFFSET 0 ROWS FETCH NEXT {} ROWS ONLY", rows),
            (Some(offset), Some(rows)) => format!("OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", offset, rows),
            (Some(offset), None) => format!("OFFSET {} ROWS", offset),
        }
    }

    fn paging_requires_order_by(&self) -> bool {
        true
    }

    fn identity_fetch(&self) -> IdentityFetch {
        IdentityFetch::Query("SELECT SCOPE_IDENTITY()".to_string())
    }

    fn returning_clause(&self, quoted_column: &str) -> String {
        format!(" OUTPUT INSERTED.{}", quoted_column)
    }

    fn begin_transaction_sql(&self) -> &'static str {
        "BEGIN TRANSACTION"
    }

    fn to_savepoint(&self, name: &str) -> String {
        format!("SAVE TRANSACTION {}", name)
    }

    fn to_release_savepoint(&self, _name: &str) -> Option<String> {
        None
    }

    fn to_rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TRANSACTION {}", name)
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

    fn to_rename_column_statement(&self, def: &ModelDefinition, old: &str, new: &str) -> String {
        let table = match self.get_schema_name(def) {
            Some(schema) => format!("{}.{}", schema, self.get_table_name(def)),
            None => self.get_table_name(def),
        };
        format!("EXEC sp_rename '{}.{}', '{}', 'COLUMN'", table, old, new)
    }

    fn to_table_exists_statement(&self, table: &str, schema: Option<&str>) -> Command {
        Command::with_params(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = @0 AND TABLE_NAME = @1",
            vec![
                Value::Text(schema.unwrap_or("dbo").to_string()),
                Value::Text(table.to_string()),
            ],
        )
    }
}
