//! Parameterized SQL text plus its ordered parameter list.

use crate::{
    dialect::Dialect,
    value::{FieldType, Value},
};

/// A rendered statement ready for execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    pub sql: String,
    pub params: Vec<Value>,
    /// Column type of each parameter when known, used to bind typed NULLs.
    pub param_types: Vec<Option<FieldType>>,
}

impl Command {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new(), param_types: Vec::new() }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self { sql: sql.into(), params, param_types: Vec::new() }
    }

    pub fn param_type(&self, index: usize) -> Option<FieldType> {
        self.param_types.get(index).copied().flatten()
    }

    /// Merges the parameters into the SQL as literals.
    ///
    /// For logging and diagnostics only; never execute the result.
    pub fn to_debug_sql(&self, dialect: &dyn Dialect) -> String {
        if self.params.is_empty() {
            return self.sql.clone();
        }

        let placeholders: Vec<String> = self
            .params
            .iter()
            .enumerate()
            .map(|(i, v)| match self.param_type(i) {
                Some(field_type) => dialect.param_for_type(i, field_type),
                None => dialect.param_for_value(i, v),
            })
            .collect();
        let positional = placeholders.windows(2).all(|w| w[0] == w[1]);

        if positional {
            let marker = &placeholders[0];
            let mut out = String::with_capacity(self.sql.len());
            let mut rest = self.sql.as_str();
            for value in &self.params {
                match rest.find(marker.as_str()) {
                    Some(pos) => {
                        out.push_str(&rest[..pos]);
                        out.push_str(&dialect.get_quoted_value(value));
                        rest = &rest[pos + marker.len()..];
                    }
                    None => break,
                }
            }
            out.push_str(rest);
            return out;
        }

        // Highest index first so `$1` does not clobber `$10`.
        let mut out = self.sql.clone();
        for (i, value) in self.params.iter().enumerate().rev() {
            out = out.replace(&placeholders[i], &dialect.get_quoted_value(value));
        }
        out
    }
}

impl From<&str> for Command {
    fn from(sql: &str) -> Self {
        Command::new(sql)
    }
}

impl From<String> for Command {
    fn from(sql: String) -> Self {
        Command::new(sql)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Accumulates SQL text and parameters, asking the dialect for placeholders.
pub struct SqlWriter<'d> {
    dialect: &'d dyn Dialect,
    sql: String,
    params: Vec<Value>,
    param_types: Vec<Option<FieldType>>,
}

impl<'d> SqlWriter<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self { dialect, sql: String::new(), params: Vec::new(), param_types: Vec::new() }
    }

    pub fn dialect(&self) -> &'d dyn Dialect {
        self.dialect
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Appends a placeholder for `value` and records the value.
    pub fn push_param(&mut self, value: Value) -> &mut Self {
        let placeholder = self.dialect.param_for_value(self.params.len(), &value);
        self.sql.push_str(&placeholder);
        self.params.push(value);
        self.param_types.push(None);
        self
    }

    /// Appends a placeholder for a value bound to a column of known type.
    pub fn push_typed_param(&mut self, value: Value, field_type: FieldType) -> &mut Self {
        let placeholder = self.dialect.param_for_type(self.params.len(), field_type);
        self.sql.push_str(&placeholder);
        self.params.push(value);
        self.param_types.push(Some(field_type));
        self
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn finish(self) -> Command {
        Command { sql: self.sql, params: self.params, param_types: self.param_types }
    }
}
