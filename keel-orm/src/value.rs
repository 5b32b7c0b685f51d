//! # Values and Semantic Types
//!
//! [`Value`] is the dialect-neutral representation of a single column value.
//! Every parameter the builder emits and every cell the engine reads passes
//! through it.
//!
//! Three traits connect Rust types to values:
//!
//! - [`DbType`]: the semantic column type a Rust type maps to
//! - [`ToValue`]: Rust value to [`Value`]
//! - [`FromValue`]: [`Value`] back to the Rust type, with the lenient
//!   coercions backends need (SQLite returns booleans as integers, dates as text)
//!
//! Complex types that are not modelled relationally are stored as JSON text
//! through the [`Json`] wrapper.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{Error, temporal};

// ============================================================================
// Semantic Field Types
// ============================================================================

/// Semantic type tag of a field, independent of any backend.
///
/// Size details (string length, decimal precision) live on the field
/// definition, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    Decimal,
    String,
    Char,
    Binary,
    Guid,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
    /// Complex value serialized to text.
    Json,
    EnumString,
    EnumInt,
}

impl FieldType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Int8
                | FieldType::Int16
                | FieldType::Int32
                | FieldType::Int64
                | FieldType::UInt8
                | FieldType::UInt16
                | FieldType::UInt32
                | FieldType::UInt64
                | FieldType::EnumInt
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, FieldType::Float | FieldType::Double | FieldType::Decimal)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Char | FieldType::Json | FieldType::EnumString)
    }
}

// ============================================================================
// Value Enum
// ============================================================================

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    NaiveDateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for the "unset" value of a key: NULL, zero, the nil UUID or an empty string.
    pub fn is_empty_key(&self) -> bool {
        match self {
            Value::Null => true,
            Value::I16(v) => *v == 0,
            Value::I32(v) => *v == 0,
            Value::I64(v) => *v == 0,
            Value::Uuid(v) => v.is_nil(),
            Value::Text(v) => v.is_empty(),
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(i64::from(*v)),
            Value::I16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            Value::F32(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::F64(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I16(v) => Some(f64::from(*v)),
            Value::I32(v) => Some(f64::from(*v)),
            Value::I64(v) => Some(*v as f64),
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            Value::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Short name of the variant, used in conversion error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "bool",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
            Value::NaiveDateTime(_) => "naive datetime",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Bytes(v) => {
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Value::Uuid(v) => write!(f, "{}", v.hyphenated()),
            Value::DateTime(v) => f.write_str(&v.to_rfc3339()),
            Value::NaiveDateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
        }
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

/// Declares the semantic column type of a Rust type.
pub trait DbType {
    fn field_type() -> FieldType;

    /// Whether the column accepts NULL. Only `Option<T>` overrides this.
    const NULLABLE: bool = false;
}

/// Converts a Rust value into a [`Value`].
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// Converts a [`Value`] back into a Rust value.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, Error>;
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

fn mismatch(target: &str, value: &Value) -> Error {
    if value.is_null() {
        Error::Conversion(format!("unexpected NULL for non-nullable {}", target))
    } else {
        Error::Conversion(format!("cannot convert {} value '{}' to {}", value.kind(), value, target))
    }
}

// ============================================================================
// Integer Implementations
// ============================================================================

macro_rules! integer_value {
    ($ty:ty, $field:expr, $variant:ident, $wide:ty) => {
        impl DbType for $ty {
            fn field_type() -> FieldType {
                $field
            }
        }

        impl ToValue for $ty {
            fn to_value(&self) -> Value {
                Value::$variant(<$wide>::from(*self))
            }
        }

        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, Error> {
                let wide = value.as_i64().ok_or_else(|| mismatch(stringify!($ty), &value))?;
                <$ty>::try_from(wide)
                    .map_err(|_| Error::Conversion(format!("{} out of range for {}", wide, stringify!($ty))))
            }
        }
    };
}

integer_value!(i8, FieldType::Int8, I16, i16);
integer_value!(i16, FieldType::Int16, I16, i16);
integer_value!(i32, FieldType::Int32, I32, i32);
integer_value!(i64, FieldType::Int64, I64, i64);
integer_value!(u8, FieldType::UInt8, I16, i16);
integer_value!(u16, FieldType::UInt16, I32, i32);
integer_value!(u32, FieldType::UInt32, I64, i64);

impl DbType for u64 {
    fn field_type() -> FieldType {
        FieldType::UInt64
    }
}

impl ToValue for u64 {
    fn to_value(&self) -> Value {
        match i64::try_from(*self) {
            Ok(v) => Value::I64(v),
            Err(_) => Value::Text(self.to_string()),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: Value) -> Result<Self, Error> {
        if let Value::Text(text) = &value {
            return text.trim().parse().map_err(|_| mismatch("u64", &value));
        }
        let wide = value.as_i64().ok_or_else(|| mismatch("u64", &value))?;
        u64::try_from(wide).map_err(|_| Error::Conversion(format!("{} out of range for u64", wide)))
    }
}

// ============================================================================
// Scalar Implementations
// ============================================================================

impl DbType for bool {
    fn field_type() -> FieldType {
        FieldType::Bool
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, Error> {
        match &value {
            Value::Bool(v) => Ok(*v),
            Value::Text(t) => match t.trim().to_lowercase().as_str() {
                "true" | "t" | "1" | "y" => Ok(true),
                "false" | "f" | "0" | "n" => Ok(false),
                _ => Err(mismatch("bool", &value)),
            },
            other => other.as_i64().map(|v| v != 0).ok_or_else(|| mismatch("bool", &value)),
        }
    }
}

impl DbType for f32 {
    fn field_type() -> FieldType {
        FieldType::Float
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::F32(*self)
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, Error> {
        value.as_f64().map(|v| v as f32).ok_or_else(|| mismatch("f32", &value))
    }
}

impl DbType for f64 {
    fn field_type() -> FieldType {
        FieldType::Double
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::F64(*self)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, Error> {
        value.as_f64().ok_or_else(|| mismatch("f64", &value))
    }
}

impl DbType for String {
    fn field_type() -> FieldType {
        FieldType::String
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Text(v) => Ok(v),
            Value::Null => Err(mismatch("String", &Value::Null)),
            Value::Bytes(v) => String::from_utf8(v).map_err(|e| Error::Conversion(e.to_string())),
            other => Ok(other.to_string()),
        }
    }
}

impl DbType for char {
    fn field_type() -> FieldType {
        FieldType::Char
    }
}

impl ToValue for char {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl FromValue for char {
    fn from_value(value: Value) -> Result<Self, Error> {
        match &value {
            Value::Text(v) => v.chars().next().ok_or_else(|| mismatch("char", &value)),
            _ => Err(mismatch("char", &value)),
        }
    }
}

impl DbType for Vec<u8> {
    fn field_type() -> FieldType {
        FieldType::Binary
    }
}

impl ToValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }
}

impl ToValue for [u8] {
    fn to_value(&self) -> Value {
        Value::Bytes(self.to_vec())
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Text(v) => Ok(v.into_bytes()),
            other => Err(mismatch("Vec<u8>", &other)),
        }
    }
}

// ============================================================================
// UUID and Temporal Implementations
// ============================================================================

impl DbType for Uuid {
    fn field_type() -> FieldType {
        FieldType::Guid
    }
}

impl ToValue for Uuid {
    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, Error> {
        match &value {
            Value::Uuid(v) => Ok(*v),
            Value::Text(v) => {
                Uuid::parse_str(v.trim()).map_err(|e| Error::Conversion(format!("Failed to parse UUID: {}", e)))
            }
            Value::Bytes(v) => Uuid::from_slice(v).map_err(|e| Error::Conversion(format!("Failed to read UUID: {}", e))),
            _ => Err(mismatch("Uuid", &value)),
        }
    }
}

impl DbType for DateTime<Utc> {
    fn field_type() -> FieldType {
        FieldType::DateTimeOffset
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match &value {
            Value::DateTime(v) => Ok(*v),
            Value::NaiveDateTime(v) => Ok(v.and_utc()),
            Value::Text(v) => temporal::parse_datetime_utc(v),
            Value::I64(secs) => {
                DateTime::from_timestamp(*secs, 0).ok_or_else(|| mismatch("DateTime<Utc>", &value))
            }
            _ => Err(mismatch("DateTime<Utc>", &value)),
        }
    }
}

impl DbType for NaiveDateTime {
    fn field_type() -> FieldType {
        FieldType::DateTime
    }
}

impl ToValue for NaiveDateTime {
    fn to_value(&self) -> Value {
        Value::NaiveDateTime(*self)
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, Error> {
        match &value {
            Value::NaiveDateTime(v) => Ok(*v),
            Value::DateTime(v) => Ok(v.naive_utc()),
            Value::Text(v) => temporal::parse_naive_datetime(v),
            _ => Err(mismatch("NaiveDateTime", &value)),
        }
    }
}

impl DbType for NaiveDate {
    fn field_type() -> FieldType {
        FieldType::Date
    }
}

impl ToValue for NaiveDate {
    fn to_value(&self) -> Value {
        Value::Date(*self)
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, Error> {
        match &value {
            Value::Date(v) => Ok(*v),
            Value::NaiveDateTime(v) => Ok(v.date()),
            Value::DateTime(v) => Ok(v.date_naive()),
            Value::Text(v) => temporal::parse_naive_date(v),
            _ => Err(mismatch("NaiveDate", &value)),
        }
    }
}

impl DbType for NaiveTime {
    fn field_type() -> FieldType {
        FieldType::Time
    }
}

impl ToValue for NaiveTime {
    fn to_value(&self) -> Value {
        Value::Time(*self)
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> Result<Self, Error> {
        match &value {
            Value::Time(v) => Ok(*v),
            Value::Text(v) => temporal::parse_naive_time(v),
            _ => Err(mismatch("NaiveTime", &value)),
        }
    }
}

// ============================================================================
// Option and JSON
// ============================================================================

impl<T: DbType> DbType for Option<T> {
    fn field_type() -> FieldType {
        T::field_type()
    }

    const NULLABLE: bool = true;
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl DbType for serde_json::Value {
    fn field_type() -> FieldType {
        FieldType::Json
    }
}

impl ToValue for serde_json::Value {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        match &value {
            Value::Text(v) => serde_json::from_str(v).map_err(|e| Error::Conversion(e.to_string())),
            _ => Err(mismatch("JSON", &value)),
        }
    }
}

/// Stores any serde type as JSON text in a single column.
///
/// The column is opaque to the query builder: it can be selected and
/// compared as a whole, never queried structurally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Json<T>(pub T);

impl<T> DbType for Json<T> {
    fn field_type() -> FieldType {
        FieldType::Json
    }
}

impl<T: Serialize> ToValue for Json<T> {
    fn to_value(&self) -> Value {
        match serde_json::to_string(&self.0) {
            Ok(text) => Value::Text(text),
            Err(e) => {
                log::warn!("failed to serialize JSON column: {}", e);
                Value::Null
            }
        }
    }
}

impl<T: DeserializeOwned> FromValue for Json<T> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match &value {
            Value::Text(v) => serde_json::from_str(v).map(Json).map_err(|e| Error::Conversion(e.to_string())),
            Value::Bytes(v) => serde_json::from_slice(v).map(Json).map_err(|e| Error::Conversion(e.to_string())),
            _ => Err(mismatch("JSON", &value)),
        }
    }
}

impl<T> std::ops::Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_coerce_from_backend_shapes() {
        assert_eq!(i32::from_value(Value::I64(42)).unwrap(), 42);
        assert_eq!(i16::from_value(Value::Text("7".into())).unwrap(), 7);
        assert!(i8::from_value(Value::I64(1000)).is_err());
        assert!(i32::from_value(Value::Null).is_err());
    }

    #[test]
    fn bools_read_from_integers() {
        assert!(bool::from_value(Value::I64(1)).unwrap());
        assert!(!bool::from_value(Value::I64(0)).unwrap());
    }

    #[test]
    fn options_map_null() {
        assert_eq!(Option::<i32>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_value(Value::I64(3)).unwrap(), Some(3));
        assert!(<Option<String> as DbType>::NULLABLE);
        assert!(!<String as DbType>::NULLABLE);
    }

    #[test]
    fn uuid_reads_from_text() {
        let id = Uuid::new_v4();
        let back = Uuid::from_value(Value::Text(id.to_string())).unwrap();
        assert_eq!(back, id);
        assert!(Value::Uuid(Uuid::nil()).is_empty_key());
    }

    #[test]
    fn json_wrapper_stores_text() {
        let value = Json(vec![1, 2, 3]).to_value();
        assert_eq!(value, Value::Text("[1,2,3]".to_string()));
        let back: Json<Vec<i32>> = Json::from_value(value).unwrap();
        assert_eq!(back.0, vec![1, 2, 3]);
    }
}
