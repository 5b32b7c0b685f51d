//! # Schema Operations
//!
//! Table and column DDL on a [`DbConnection`], generated from model
//! definitions by the connection's dialect.
//!
//! `create_table` runs, in order: the model's pre-create hook, `CREATE TABLE`,
//! one statement per index, then the post-create hook. A failing step stops
//! the sequence. Index statements that fail because the index already exists
//! are logged and skipped.

use crate::{
    Error,
    database::{DbConnection, SQL_TARGET},
    model::{Model, ModelDefinition},
    value::Value,
};

impl DbConnection {
    pub async fn create_table<T: Model>(&mut self) -> Result<(), Error> {
        let def = T::model_definition();
        if let Some(hook) = &def.pre_create_sql {
            self.execute_ddl(hook).await?;
        }

        let create = self.dialect().to_create_table_statement(&def);
        self.execute_ddl(&create).await?;

        for statement in self.dialect().to_create_index_statements(&def) {
            match self.execute_ddl(&statement).await {
                Err(err) if err.is_already_exists() => {
                    log::warn!(target: SQL_TARGET, "index already exists, skipped: {}", err);
                }
                other => other?,
            }
        }

        if let Some(hook) = &def.post_create_sql {
            self.execute_ddl(hook).await?;
        }
        Ok(())
    }

    /// Creates the table unless it exists. Returns `true` when it was created.
    pub async fn create_table_if_not_exists<T: Model>(&mut self) -> Result<bool, Error> {
        if self.table_exists::<T>().await? {
            log::trace!(target: SQL_TARGET, "table for {} exists", T::model_definition().name);
            return Ok(false);
        }
        self.create_table::<T>().await?;
        Ok(true)
    }

    pub async fn drop_table<T: Model>(&mut self) -> Result<(), Error> {
        let def = T::model_definition();
        if let Some(hook) = &def.pre_drop_sql {
            self.execute_ddl(hook).await?;
        }
        let drop = self.dialect().to_drop_table_statement(&def);
        self.execute_ddl(&drop).await?;
        if let Some(hook) = &def.post_drop_sql {
            self.execute_ddl(hook).await?;
        }
        Ok(())
    }

    /// Drops the table when present, then creates it.
    pub async fn drop_and_create_table<T: Model>(&mut self) -> Result<(), Error> {
        if self.table_exists::<T>().await? {
            self.drop_table::<T>().await?;
        }
        self.create_table::<T>().await
    }

    pub async fn table_exists<T: Model>(&mut self) -> Result<bool, Error> {
        let def = T::model_definition();
        let (table, schema) = physical_location(self, &def);
        let cmd = self.dialect().to_table_exists_statement(&table, schema.as_deref());
        let rows = self.fetch_rows(&cmd).await?;
        let count = rows
            .first()
            .and_then(|row| row.values().first())
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(count > 0)
    }

    pub async fn create_schema(&mut self, schema: &str) -> Result<(), Error> {
        let sql = self.dialect().to_create_schema_statement(schema)?;
        match self.execute_ddl(&sql).await {
            Err(err) if err.is_already_exists() => {
                log::warn!(target: SQL_TARGET, "schema {} already exists", schema);
                Ok(())
            }
            other => other,
        }
    }

    /// Adds the column for one of the model's fields.
    pub async fn add_column<T: Model>(&mut self, field: &str) -> Result<(), Error> {
        let def = T::model_definition();
        let field = def
            .get_field(field)
            .ok_or_else(|| Error::invalid_argument(format!("{} has no field {}", def.name, field)))?;
        let sql = self.dialect().to_add_column_statement(&def, field);
        self.execute_ddl(&sql).await
    }

    pub async fn drop_column<T: Model>(&mut self, column: &str) -> Result<(), Error> {
        let def = T::model_definition();
        let sql = self.dialect().to_drop_column_statement(&def, column)?;
        self.execute_ddl(&sql).await
    }

    pub async fn rename_column<T: Model>(&mut self, old: &str, new: &str) -> Result<(), Error> {
        let def = T::model_definition();
        let sql = self.dialect().to_rename_column_statement(&def, old, new);
        self.execute_ddl(&sql).await
    }
}

/// Table and schema names as the catalog stores them.
///
/// Backends without schemas keep the folded `schema_table` name.
fn physical_location(conn: &DbConnection, def: &ModelDefinition) -> (String, Option<String>) {
    let dialect = conn.dialect();
    let table = dialect.get_table_name(def);
    match dialect.get_schema_name(def) {
        Some(schema) if dialect.capabilities().schemas => (table, Some(schema)),
        Some(schema) => (dialect.apply_name_restrictions(&format!("{}_{}", schema, table)), None),
        None => (table, None),
    }
}
