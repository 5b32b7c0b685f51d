//! # Value Binding Module
//!
//! Moves [`Value`]s into sqlx `AnyArguments`.
//!
//! The Any driver only understands booleans, integers, floats, text and
//! blobs. Everything else is lowered before binding:
//!
//! - UUIDs bind as hyphenated text
//! - temporal values bind as text in the backend's preferred format (see
//!   [`temporal`]); placeholders carry any casts the backend needs
//! - NULLs bind with the type of the column they target when it is known, so
//!   strictly typed backends accept them

use sqlx::Arguments;
use sqlx::any::AnyArguments;

use crate::{
    Error,
    command::Command,
    dialect::DialectKind,
    temporal,
    value::{FieldType, Value},
};

// ============================================================================
// Value Binding Trait
// ============================================================================

/// Extension trait for binding values to `AnyArguments` with backend-specific handling.
pub trait ValueBinder {
    /// Binds one value, optionally typed by the column it is written to.
    fn bind_value(&mut self, value: &Value, hint: Option<FieldType>, kind: DialectKind) -> Result<(), Error>;

    /// Binds a NULL carrying the type of the target column.
    fn bind_null(&mut self, hint: Option<FieldType>) -> Result<(), Error>;
}

fn bind_err(e: sqlx::error::BoxDynError) -> Error {
    Error::Conversion(format!("failed to bind parameter: {}", e))
}

impl ValueBinder for AnyArguments<'_> {
    fn bind_value(&mut self, value: &Value, hint: Option<FieldType>, kind: DialectKind) -> Result<(), Error> {
        match coerce(value, hint) {
            Value::Null => self.bind_null(hint),
            Value::Bool(v) => self.add(v).map_err(bind_err),
            Value::I16(v) => self.add(v).map_err(bind_err),
            Value::I32(v) => self.add(v).map_err(bind_err),
            Value::I64(v) => self.add(v).map_err(bind_err),
            Value::F32(v) => self.add(v).map_err(bind_err),
            Value::F64(v) => self.add(v).map_err(bind_err),
            Value::Text(v) => self.add(v).map_err(bind_err),
            Value::Bytes(v) => self.add(v).map_err(bind_err),
            Value::Uuid(v) => self.add(v.hyphenated().to_string()).map_err(bind_err),
            Value::DateTime(v) => self.add(temporal::format_datetime_for(&v, kind)).map_err(bind_err),
            Value::NaiveDateTime(v) => self.add(temporal::format_naive_datetime_for(&v, kind)).map_err(bind_err),
            Value::Date(v) => self.add(temporal::format_date(&v)).map_err(bind_err),
            Value::Time(v) => self.add(temporal::format_time(&v)).map_err(bind_err),
        }
    }

    fn bind_null(&mut self, hint: Option<FieldType>) -> Result<(), Error> {
        let result = match hint {
            Some(FieldType::Bool) => self.add(None::<bool>),
            Some(FieldType::Int8 | FieldType::Int16 | FieldType::UInt8) => self.add(None::<i16>),
            Some(FieldType::Int32 | FieldType::UInt16 | FieldType::EnumInt) => self.add(None::<i32>),
            Some(FieldType::Int64 | FieldType::UInt32) => self.add(None::<i64>),
            Some(FieldType::Float) => self.add(None::<f32>),
            Some(FieldType::Double) => self.add(None::<f64>),
            Some(FieldType::Binary) => self.add(None::<Vec<u8>>),
            _ => self.add(None::<String>),
        };
        result.map_err(bind_err)
    }
}

/// Adjusts a value to the column type it targets.
///
/// Only lossless adjustments are made; anything else is bound as given and
/// left for the backend to accept or reject.
fn coerce(value: &Value, hint: Option<FieldType>) -> Value {
    let Some(hint) = hint else { return value.clone() };
    match (hint, value) {
        (FieldType::Bool, Value::I16(_) | Value::I32(_) | Value::I64(_)) => {
            Value::Bool(value.as_i64().is_some_and(|v| v != 0))
        }
        (FieldType::Int8 | FieldType::Int16 | FieldType::UInt8, v @ (Value::I32(_) | Value::I64(_) | Value::Bool(_))) => {
            match v.as_i64().and_then(|w| i16::try_from(w).ok()) {
                Some(narrow) => Value::I16(narrow),
                None => v.clone(),
            }
        }
        (FieldType::Int32 | FieldType::UInt16 | FieldType::EnumInt, v @ (Value::I16(_) | Value::I64(_) | Value::Bool(_))) => {
            match v.as_i64().and_then(|w| i32::try_from(w).ok()) {
                Some(narrow) => Value::I32(narrow),
                None => v.clone(),
            }
        }
        (FieldType::Int64 | FieldType::UInt32, v @ (Value::I16(_) | Value::I32(_) | Value::Bool(_))) => {
            v.as_i64().map(Value::I64).unwrap_or_else(|| v.clone())
        }
        (FieldType::Double | FieldType::Decimal, v @ (Value::I16(_) | Value::I32(_) | Value::I64(_) | Value::F32(_))) => {
            v.as_f64().map(Value::F64).unwrap_or_else(|| v.clone())
        }
        _ => value.clone(),
    }
}

// ============================================================================
// Convenience Functions
// ============================================================================

/// Builds the argument list for a command.
///
/// ```rust,ignore
/// let cmd = Command::with_params("SELECT * FROM t WHERE id = ?", vec![Value::I64(1)]);
/// let args = bind_command(&cmd, DialectKind::Sqlite)?;
/// let rows = sqlx::Executor::fetch_all(&mut *conn, sqlx::query_with(&cmd.sql, args)).await?;
/// ```
pub fn bind_command(cmd: &Command, kind: DialectKind) -> Result<AnyArguments<'static>, Error> {
    let mut args = AnyArguments::default();
    for (i, value) in cmd.params.iter().enumerate() {
        args.bind_value(value, cmd.param_type(i), kind)?;
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_widen_to_column_width() {
        assert_eq!(coerce(&Value::I32(5), Some(FieldType::Int64)), Value::I64(5));
        assert_eq!(coerce(&Value::I64(5), Some(FieldType::Int32)), Value::I32(5));
        assert_eq!(coerce(&Value::I64(5), Some(FieldType::Int16)), Value::I16(5));
        assert_eq!(coerce(&Value::I32(3), Some(FieldType::Double)), Value::F64(3.0));
    }

    #[test]
    fn out_of_range_values_pass_through() {
        assert_eq!(coerce(&Value::I64(i64::MAX), Some(FieldType::Int32)), Value::I64(i64::MAX));
        assert_eq!(coerce(&Value::Text("x".into()), Some(FieldType::Int16)), Value::Text("x".into()));
    }

    #[test]
    fn integers_become_bools_for_bool_columns() {
        assert_eq!(coerce(&Value::I64(1), Some(FieldType::Bool)), Value::Bool(true));
        assert_eq!(coerce(&Value::I32(0), Some(FieldType::Bool)), Value::Bool(false));
    }

    #[test]
    fn binds_every_parameter() {
        let cmd = Command::with_params(
            "INSERT INTO t VALUES (?, ?, ?)",
            vec![Value::I64(1), Value::Null, Value::Uuid(uuid::Uuid::new_v4())],
        );
        assert!(bind_command(&cmd, DialectKind::Sqlite).is_ok());
    }
}
