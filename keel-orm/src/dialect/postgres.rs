use std::sync::Arc;

use super::{Dialect, DialectCapabilities, DialectKind, IdentityFetch, OnConflict, insert_fields};
use crate::{
    Error,
    command::Command,
    model::{FieldDefinition, ModelDefinition},
    naming::{DefaultNaming, NamingStrategy},
    value::{FieldType, Value},
};

/// PostgreSQL 10+.
///
/// UUID and temporal values travel as text through the Any driver, so
/// placeholders carry a cast and reads cast back to text.
#[derive(Debug, Clone)]
pub struct PostgresDialect {
    naming: Arc<dyn NamingStrategy>,
}

impl PostgresDialect {
    pub fn new() -> Self {
        Self { naming: Arc::new(DefaultNaming) }
    }

    pub fn with_naming(naming: Arc<dyn NamingStrategy>) -> Self {
        Self { naming }
    }
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self::new()
    }
}

fn cast_for(field_type: FieldType) -> Option<&'static str> {
    match field_type {
        FieldType::Guid => Some("uuid"),
        FieldType::DateTimeOffset => Some("timestamptz"),
        FieldType::DateTime => Some("timestamp"),
        FieldType::Date => Some("date"),
        FieldType::Time => Some("time"),
        FieldType::UInt64 | FieldType::Decimal => Some("numeric"),
        _ => None,
    }
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            schemas: true,
            cascading_foreign_keys: true,
            drop_column: true,
            composite_unique: true,
            returning_identity: true,
            bulk_load: true,
            savepoints: true,
        }
    }

    fn naming(&self) -> &dyn NamingStrategy {
        self.naming.as_ref()
    }

    fn max_name_length(&self) -> Option<usize> {
        Some(63)
    }

    fn native_type(&self, field: &FieldDefinition) -> String {
        if field.auto_increment {
            return match field.field_type {
                FieldType::Int64 | FieldType::UInt32 | FieldType::UInt64 => "BIGSERIAL".to_string(),
                _ => "SERIAL".to_string(),
            };
        }
        match field.field_type {
            FieldType::Bool => "BOOLEAN".to_string(),
            FieldType::Int8 | FieldType::UInt8 | FieldType::Int16 => "SMALLINT".to_string(),
            FieldType::UInt16 | FieldType::Int32 | FieldType::EnumInt => "INTEGER".to_string(),
            FieldType::UInt32 | FieldType::Int64 => "BIGINT".to_string(),
            FieldType::UInt64 => "NUMERIC(20,0)".to_string(),
            FieldType::Float => "REAL".to_string(),
            FieldType::Double => "DOUBLE PRECISION".to_string(),
            FieldType::Decimal => super::decimal("NUMERIC", field),
            FieldType::String if field.max_text => "TEXT".to_string(),
            FieldType::String => match field.length {
                Some(len) => format!("VARCHAR({})", len),
                None => "TEXT".to_string(),
            },
            FieldType::Char => "CHAR(1)".to_string(),
            FieldType::Binary => "BYTEA".to_string(),
            FieldType::Guid => "UUID".to_string(),
            FieldType::DateTime => "TIMESTAMP".to_string(),
            FieldType::DateTimeOffset => "TIMESTAMPTZ".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Time => "TIME".to_string(),
            FieldType::Json => "TEXT".to_string(),
            FieldType::EnumString => super::sized("VARCHAR", field, 255),
        }
    }

    fn auto_increment_definition(&self) -> &'static str {
        ""
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    fn param_for_value(&self, index: usize, value: &Value) -> String {
        let cast = match value {
            Value::Uuid(_) => Some("uuid"),
            Value::DateTime(_) => Some("timestamptz"),
            Value::NaiveDateTime(_) => Some("timestamp"),
            Value::Date(_) => Some("date"),
            Value::Time(_) => Some("time"),
            _ => None,
        };
        match cast {
            Some(cast) => format!("${}::{}", index + 1, cast),
            None => self.param_placeholder(index),
        }
    }

    fn param_for_type(&self, index: usize, field_type: FieldType) -> String {
        match cast_for(field_type) {
            Some(cast) => format!("${}::{}", index + 1, cast),
            None => self.param_placeholder(index),
        }
    }

    fn select_column_expr(&self, quoted_column: &str, field: &FieldDefinition) -> Option<String> {
        match field.field_type {
            FieldType::Guid
            | FieldType::DateTime
            | FieldType::DateTimeOffset
            | FieldType::Date
            | FieldType::Time
            | FieldType::UInt64 => Some(format!("{}::text", quoted_column)),
            FieldType::Decimal => Some(format!("{}::float8", quoted_column)),
            _ => None,
        }
    }

    fn quote_bytes(&self, bytes: &[u8]) -> String {
        format!("'\\x{}'::bytea", super::hex(bytes))
    }

    fn sql_concat(&self, parts: &[&str]) -> String {
        parts.join(" || ")
    }

    fn sql_random(&self) -> &'static str {
        "RANDOM()"
    }

    fn sql_conflict(&self, def: &ModelDefinition, sql: &str, on_conflict: OnConflict) -> Result<String, Error> {
        match on_conflict {
            OnConflict::Fail => Ok(sql.to_string()),
            OnConflict::Ignore => Ok(format!("{} ON CONFLICT DO NOTHING", sql)),
            OnConflict::Replace => {
                let keys: Vec<String> = def.primary_keys().iter().map(|f| self.get_quoted_column_name(f)).collect();
                if keys.is_empty() {
                    return Err(Error::invalid_argument(format!("{} has no primary key to replace on", def.name)));
                }
                let updates: Vec<String> = insert_fields(def)
                    .into_iter()
                    .filter(|f| !f.primary_key)
                    .map(|f| {
                        let column = self.get_quoted_column_name(f);
                        format!("{} = EXCLUDED.{}", column, column)
                    })
                    .collect();
                if updates.is_empty() {
                    return Ok(format!("{} ON CONFLICT ({}) DO NOTHING", sql, keys.join(", ")));
                }
                Ok(format!("{} ON CONFLICT ({}) DO UPDATE SET {}", sql, keys.join(", "), updates.join(", ")))
            }
        }
    }

    fn identity_fetch(&self) -> IdentityFetch {
        IdentityFetch::Returning
    }

    fn to_table_exists_statement(&self, table: &str, schema: Option<&str>) -> Command {
        Command::with_params(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
            vec![
                Value::Text(schema.unwrap_or("public").to_string()),
                Value::Text(table.to_string()),
            ],
        )
    }
}
