//! # Row Materialization
//!
//! [`DataRow`] is a driver-independent copy of one result row: the column
//! names in select order plus their [`Value`]s. It doubles as the generic
//! ordered dictionary returned by `select_dicts`.
//!
//! [`RowReader`] resolves logical field names against a row. It knows the
//! dialect (for naming), optionally the model being read (for aliases and
//! nullability), a column prefix (for joined tuples) and the read filters
//! from the configuration.

use std::sync::Arc;

use sqlx::any::AnyRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::{
    Error,
    config::ReadFilters,
    dialect::Dialect,
    model::{FieldDefinition, FromDataRow, Model, ModelDefinition},
    value::{FromValue, Value},
};

// ============================================================================
// DataRow
// ============================================================================

/// One result row with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl DataRow {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Copies a driver row, decoding each cell by its runtime type.
    pub fn from_any_row(row: &AnyRow, columns: Arc<[String]>) -> Result<Self, Error> {
        let mut values = Vec::with_capacity(row.len());
        for index in 0..row.len() {
            values.push(decode_cell(row, index)?);
        }
        Ok(Self { columns, values })
    }

    /// Column names of a driver row, shared by every row of one result.
    pub fn column_names(row: &AnyRow) -> Arc<[String]> {
        row.columns().iter().map(|c| c.name().to_string()).collect::<Vec<_>>().into()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a column: exact match first, then ignoring case.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index_of(name).map(|i| &self.values[i])
    }

    /// Reads a column as `T`. A missing column reads as NULL.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T, Error> {
        let value = self.get(name).cloned().unwrap_or(Value::Null);
        T::from_value(value).map_err(|e| Error::mapping(name, e.to_string()))
    }

    /// Iterates `(column, value)` pairs in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

fn decode_cell(row: &AnyRow, index: usize) -> Result<Value, Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let decoded = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(index).map(Value::Bool),
        "SMALLINT" => row.try_get::<i16, _>(index).map(Value::I16),
        "INTEGER" => row.try_get::<i32, _>(index).map(Value::I32),
        "BIGINT" => row.try_get::<i64, _>(index).map(Value::I64),
        "REAL" => row.try_get::<f32, _>(index).map(Value::F32),
        "DOUBLE" => row.try_get::<f64, _>(index).map(Value::F64),
        "TEXT" => row.try_get::<String, _>(index).map(Value::Text),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        _ => return probe_cell(row, index, &type_name),
    };
    match decoded {
        Ok(value) => Ok(value),
        Err(_) => probe_cell(row, index, &type_name),
    }
}

/// Tries each Any-supported type in turn for cells of an unexpected type.
fn probe_cell(row: &AnyRow, index: usize, type_name: &str) -> Result<Value, Error> {
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(Value::I64(v));
    }
    if let Ok(v) = row.try_get::<i32, _>(index) {
        return Ok(Value::I32(v));
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(Value::F64(v));
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(Value::Text(v));
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(Value::Bytes(v));
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Ok(Value::Bool(v));
    }
    let name = row.columns().get(index).map(|c| c.name().to_string()).unwrap_or_default();
    Err(Error::mapping(&name, format!("unsupported column type {}", type_name)))
}

// ============================================================================
// RowReader
// ============================================================================

/// Resolves logical field names against a [`DataRow`].
#[derive(Clone)]
pub struct RowReader<'a> {
    row: &'a DataRow,
    dialect: &'a dyn Dialect,
    model: Option<&'a ModelDefinition>,
    prefix: Option<String>,
    filters: Option<&'a ReadFilters>,
}

impl<'a> RowReader<'a> {
    pub fn new(row: &'a DataRow, dialect: &'a dyn Dialect) -> Self {
        Self { row, dialect, model: None, prefix: None, filters: None }
    }

    pub(crate) fn with_filters(mut self, filters: &'a ReadFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn row(&self) -> &DataRow {
        self.row
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect
    }

    /// A reader resolving names through `def`'s field definitions.
    pub fn for_model<'b>(&'b self, def: &'b ModelDefinition) -> RowReader<'b> {
        RowReader {
            row: self.row,
            dialect: self.dialect,
            model: Some(def),
            prefix: self.prefix.clone(),
            filters: self.filters,
        }
    }

    /// A reader whose column names all start with `prefix`.
    pub fn prefixed(&self, prefix: &str) -> RowReader<'a> {
        RowReader { prefix: Some(prefix.to_string()), model: None, ..self.clone() }
    }

    /// Reads a model whose columns were selected as `<table>__<column>`.
    pub fn nested<M: Model>(&self) -> Result<M, Error> {
        let def = M::model_definition();
        let prefix = format!("{}__", self.dialect.get_table_name(&def));
        M::from_data_row(&self.prefixed(&prefix))
    }

    fn field(&self, name: &str) -> Option<&'a FieldDefinition> {
        self.model.and_then(|def| def.get_field(name))
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        let physical = match self.field(name) {
            Some(field) => self.dialect.get_column_name(field),
            None => self.dialect.apply_name_restrictions(&self.dialect.naming().column_name(name)),
        };
        match &self.prefix {
            Some(prefix) => self
                .row
                .index_of(&format!("{}{}", prefix, physical))
                .or_else(|| self.row.index_of(&format!("{}{}", prefix, name))),
            None => self.row.index_of(&physical).or_else(|| self.row.index_of(name)),
        }
    }

    /// The raw value for a field after read filters. Missing columns read as NULL.
    pub fn value(&self, name: &str) -> Value {
        let value = match self.column_index(name) {
            Some(index) => self.row.values()[index].clone(),
            None => Value::Null,
        };
        let Some(filters) = self.filters else { return value };
        match value {
            Value::Text(text) => Value::Text(filters.filter_string(text)),
            Value::Null => match self.field(name) {
                Some(field) => filters.substitute_null(field).unwrap_or(Value::Null),
                None => Value::Null,
            },
            other => other,
        }
    }

    /// Reads a field as `T`, reporting failures as [`Error::Mapping`].
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T, Error> {
        T::from_value(self.value(name)).map_err(|e| match e {
            Error::Conversion(message) => Error::mapping(name, message),
            other => Error::mapping(name, other.to_string()),
        })
    }
}

// ============================================================================
// Tuple Implementations
// ============================================================================

/// Types that know the models a multi-select reads.
pub trait MultiModel: FromDataRow {
    fn definitions() -> Vec<Arc<ModelDefinition>>;
}

macro_rules! impl_model_tuple {
    ($($T:ident),+) => {
        impl<$($T: Model),+> FromDataRow for ($($T,)+) {
            fn from_data_row(row: &RowReader<'_>) -> Result<Self, Error> {
                Ok(($(row.nested::<$T>()?,)+))
            }
        }

        impl<$($T: Model),+> MultiModel for ($($T,)+) {
            fn definitions() -> Vec<Arc<ModelDefinition>> {
                vec![$($T::model_definition()),+]
            }
        }
    };
}

impl_model_tuple!(A, B);
impl_model_tuple!(A, B, C);
impl_model_tuple!(A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StringFilter;
    use crate::dialect::SqliteDialect;

    fn row() -> DataRow {
        DataRow::new(
            vec!["Id".to_string(), "Name".to_string(), "Person__Id".to_string()].into(),
            vec![Value::I64(1), Value::Text("Ann  ".into()), Value::I64(7)],
        )
    }

    #[test]
    fn lookup_falls_back_to_case_insensitive() {
        let row = row();
        assert_eq!(row.get("name"), Some(&Value::Text("Ann  ".into())));
        assert_eq!(row.index_of("ID"), Some(0));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn missing_columns_read_as_null() {
        let row = row();
        let dialect = SqliteDialect::new();
        let reader = RowReader::new(&row, &dialect);
        assert_eq!(reader.get::<Option<i32>>("Age").unwrap(), None);
        let err = reader.get::<i32>("Age").unwrap_err();
        assert!(matches!(err, Error::Mapping { ref field, .. } if field == "Age"));
    }

    #[test]
    fn prefixed_reader_reads_aliased_columns() {
        let row = row();
        let dialect = SqliteDialect::new();
        let reader = RowReader::new(&row, &dialect).prefixed("Person__");
        assert_eq!(reader.get::<i64>("Id").unwrap(), 7);
    }

    #[test]
    fn string_filter_applies_to_text() {
        let row = row();
        let dialect = SqliteDialect::new();
        let trim: StringFilter = Arc::new(|s: &str| s.trim_end().to_string());
        let filters = ReadFilters::new(Some(trim), None);
        let reader = RowReader::new(&row, &dialect).with_filters(&filters);
        assert_eq!(reader.get::<String>("Name").unwrap(), "Ann");
    }
}
