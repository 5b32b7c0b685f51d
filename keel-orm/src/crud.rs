//! # CRUD Operations
//!
//! Reads and writes on a [`DbConnection`]. Reads take a [`SqlExpression`] or
//! raw SQL; writes take model instances and return rows affected.
//!
//! ## Identity handling
//!
//! - auto-increment keys are left to the backend; [`DbConnection::insert_and_get_id`]
//!   reads the generated value back and stores it on the entity
//! - `auto_id` keys get a fresh UUID before the insert, unless the caller
//!   already supplied a non-empty value
//! - other keys are written as given
//!
//! Insert and update filters from the configuration run before any SQL is
//! built; an error from a filter aborts the write.

use std::collections::HashSet;

use uuid::Uuid;

use crate::{
    Error,
    command::{Command, SqlWriter},
    database::DbConnection,
    dialect::{Dialect, IdentityFetch, OnConflict, insert_fields},
    expression::{Expr, SqlExpression, col},
    model::{FromDataRow, IdentityStrategy, Model, ModelDefinition},
    row::{DataRow, MultiModel},
    value::{FieldType, FromValue, ToValue, Value},
};

/// Rows per statement for [`DbConnection::bulk_insert`].
const BULK_CHUNK: usize = 500;

impl DbConnection {
    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn select<T: Model>(&mut self, query: &SqlExpression<T>) -> Result<Vec<T>, Error> {
        let rows = self.fetch_rows(&query.to_select_statement()?).await?;
        self.materialize(&rows)
    }

    /// Every row of `T` that passes its select filters.
    pub async fn select_all<T: Model>(&mut self) -> Result<Vec<T>, Error> {
        let query = self.from::<T>();
        self.select(&query).await
    }

    /// Runs a query on `T` and reads each row as `R`, usually a projection type.
    pub async fn select_as<R: FromDataRow, T: Model>(&mut self, query: &SqlExpression<T>) -> Result<Vec<R>, Error> {
        let rows = self.fetch_rows(&query.to_select_statement()?).await?;
        self.materialize(&rows)
    }

    /// The first matching row, if any.
    pub async fn single<T: Model>(&mut self, query: &SqlExpression<T>) -> Result<Option<T>, Error> {
        let query = query.clone().take(1);
        Ok(self.select(&query).await?.into_iter().next())
    }

    pub async fn single_by_id<T: Model>(&mut self, id: impl ToValue) -> Result<Option<T>, Error> {
        let key = key_field::<T>()?;
        let query = self.from::<T>().filter(col(&key).equals(id.to_value()));
        self.single(&query).await
    }

    pub async fn select_by_ids<T: Model, V: ToValue>(&mut self, ids: impl IntoIterator<Item = V>) -> Result<Vec<T>, Error> {
        let key = key_field::<T>()?;
        let query = self.from::<T>().filter(col(&key).in_list(ids));
        self.select(&query).await
    }

    pub async fn count<T: Model>(&mut self, query: &SqlExpression<T>) -> Result<i64, Error> {
        let rows = self.fetch_rows(&query.to_count_statement()?).await?;
        first_value(&rows).map_or(Ok(0), i64::from_value)
    }

    pub async fn exists<T: Model>(&mut self, query: &SqlExpression<T>) -> Result<bool, Error> {
        let query = query.clone().select([Expr::raw("1")]).take(1);
        Ok(!self.fetch_rows(&query.to_select_statement()?).await?.is_empty())
    }

    /// First column of the first row. No rows reads as NULL.
    pub async fn scalar<T: Model, V: FromValue>(&mut self, query: &SqlExpression<T>) -> Result<V, Error> {
        let rows = self.fetch_rows(&query.to_select_statement()?).await?;
        V::from_value(first_value(&rows).unwrap_or(Value::Null))
    }

    /// First column of every row.
    pub async fn column<T: Model, V: FromValue>(&mut self, query: &SqlExpression<T>) -> Result<Vec<V>, Error> {
        let rows = self.fetch_rows(&query.to_select_statement()?).await?;
        first_column(rows)
    }

    /// Rows as ordered column/value maps.
    pub async fn select_dicts<T: Model>(&mut self, query: &SqlExpression<T>) -> Result<Vec<DataRow>, Error> {
        self.fetch_rows(&query.to_select_statement()?).await
    }

    /// Reads joined models as tuples, each element from its own prefixed columns.
    ///
    /// ```rust,ignore
    /// let q = conn.from::<Person>().join_on_fk::<Pet>();
    /// let pairs: Vec<(Person, Pet)> = conn.select_multi(&q).await?;
    /// ```
    pub async fn select_multi<M: MultiModel, T: Model>(&mut self, query: &SqlExpression<T>) -> Result<Vec<M>, Error> {
        let cmd = query.to_multi_select_statement(&M::definitions())?;
        let rows = self.fetch_rows(&cmd).await?;
        self.materialize(&rows)
    }

    // ------------------------------------------------------------------------
    // Custom SQL
    // ------------------------------------------------------------------------

    pub async fn sql_list<R: FromDataRow>(&mut self, cmd: impl Into<Command>) -> Result<Vec<R>, Error> {
        let rows = self.fetch_rows(&cmd.into()).await?;
        self.materialize(&rows)
    }

    pub async fn sql_scalar<V: FromValue>(&mut self, cmd: impl Into<Command>) -> Result<V, Error> {
        let rows = self.fetch_rows(&cmd.into()).await?;
        V::from_value(first_value(&rows).unwrap_or(Value::Null))
    }

    pub async fn sql_column<V: FromValue>(&mut self, cmd: impl Into<Command>) -> Result<Vec<V>, Error> {
        let rows = self.fetch_rows(&cmd.into()).await?;
        first_column(rows)
    }

    pub async fn sql_dicts(&mut self, cmd: impl Into<Command>) -> Result<Vec<DataRow>, Error> {
        self.fetch_rows(&cmd.into()).await
    }

    /// Runs a statement and returns rows affected.
    pub async fn execute_sql(&mut self, cmd: impl Into<Command>) -> Result<u64, Error> {
        Ok(self.execute_command(&cmd.into()).await?.rows_affected)
    }

    // ========================================================================
    // Inserts
    // ========================================================================

    /// Inserts without reading back a generated key.
    pub async fn insert<T: Model>(&mut self, entity: &mut T) -> Result<(), Error> {
        self.insert_with(entity, OnConflict::Fail).await.map(|_| ())
    }

    /// Inserts with conflict handling. Returns rows affected, zero when ignored.
    pub async fn insert_with<T: Model>(&mut self, entity: &mut T, on_conflict: OnConflict) -> Result<u64, Error> {
        let def = T::model_definition();
        self.prepare_insert(&def, entity)?;
        let mut cmd = insert_command(self.dialect(), &def, entity);
        cmd.sql = self.dialect().sql_conflict(&def, &cmd.sql, on_conflict)?;
        Ok(self.execute_command(&cmd).await?.rows_affected)
    }

    /// Inserts and returns the backend-generated key, storing it on the entity.
    ///
    /// Fails when the model has no auto-increment key or the backend reports none.
    pub async fn insert_and_get_id<T: Model>(&mut self, entity: &mut T) -> Result<i64, Error> {
        let def = T::model_definition();
        let Some(field) = def.fields.iter().find(|f| f.auto_increment) else {
            return Err(Error::invalid_argument(format!("{} has no auto-increment key", def.name)));
        };
        self.prepare_insert(&def, entity)?;
        let mut cmd = insert_command(self.dialect(), &def, entity);

        let id = match self.dialect().identity_fetch() {
            IdentityFetch::Returning => {
                cmd.sql.push_str(&self.dialect().returning_clause(&self.dialect().get_quoted_column_name(field)));
                let rows = self.fetch_written_rows(&cmd).await?;
                first_value(&rows).and_then(|v| v.as_i64())
            }
            IdentityFetch::Query(sql) => {
                self.execute_command(&cmd).await?;
                let rows = self.fetch_rows(&Command::new(sql)).await?;
                first_value(&rows).and_then(|v| v.as_i64())
            }
            IdentityFetch::LastInsertId => self.execute_command(&cmd).await?.last_insert_id,
        };
        let id = id.ok_or_else(|| Error::invalid_data(format!("no generated key returned for {}", def.name)))?;

        entity.set_value(&field.name, Value::I64(id))?;
        Ok(id)
    }

    /// Inserts every entity in one transaction.
    pub async fn insert_all<T: Model>(&mut self, entities: &mut [T]) -> Result<(), Error> {
        let mut tx = self.begin().await?;
        for entity in entities.iter_mut() {
            tx.insert(entity).await?;
        }
        tx.commit().await
    }

    /// Inserts with multi-row literal statements, in chunks.
    ///
    /// Faster than [`insert_all`](Self::insert_all) for large sets. Generated
    /// keys are not read back.
    pub async fn bulk_insert<T: Model>(&mut self, entities: &mut [T]) -> Result<u64, Error> {
        let def = T::model_definition();
        for entity in entities.iter_mut() {
            self.prepare_insert(&def, entity)?;
        }
        let fields = insert_fields(&def);
        let mut affected = 0;
        for chunk in entities.chunks(BULK_CHUNK) {
            let rows: Vec<Vec<Value>> = chunk
                .iter()
                .map(|e| fields.iter().map(|f| e.get_value(&f.name).unwrap_or(Value::Null)).collect())
                .collect();
            let sql = self.dialect().to_insert_rows_sql(&def, &rows);
            if sql.is_empty() {
                continue;
            }
            affected += self.execute_command(&Command::new(sql)).await?.rows_affected;
        }
        Ok(affected)
    }

    fn prepare_insert<T: Model>(&self, def: &ModelDefinition, entity: &mut T) -> Result<(), Error> {
        self.config().apply_insert_filters(def, entity)?;
        assign_auto_ids(def, entity)
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Updates every writable non-key field, matching on the primary key.
    pub async fn update<T: Model>(&mut self, entity: &mut T) -> Result<u64, Error> {
        let def = T::model_definition();
        self.config().apply_update_filters(&def, entity)?;
        let Some(cmd) = update_command(self.dialect(), &def, entity)? else { return Ok(0) };
        Ok(self.execute_command(&cmd).await?.rows_affected)
    }

    /// Updates every entity in one transaction.
    pub async fn update_all<T: Model>(&mut self, entities: &mut [T]) -> Result<u64, Error> {
        let mut tx = self.begin().await?;
        let mut affected = 0;
        for entity in entities.iter_mut() {
            affected += tx.update(entity).await?;
        }
        tx.commit().await?;
        Ok(affected)
    }

    /// Sets the listed fields on every row matching the query.
    pub async fn update_only<T: Model, S: AsRef<str>>(
        &mut self,
        values: &[(S, Value)],
        query: &SqlExpression<T>,
    ) -> Result<u64, Error> {
        let cmd = query.to_update_statement(values)?;
        Ok(self.execute_command(&cmd).await?.rows_affected)
    }

    /// Adds to the listed numeric fields on every row matching the query.
    pub async fn update_add<T: Model, S: AsRef<str>>(
        &mut self,
        values: &[(S, Value)],
        query: &SqlExpression<T>,
    ) -> Result<u64, Error> {
        let cmd = query.to_update_add_statement(values)?;
        Ok(self.execute_command(&cmd).await?.rows_affected)
    }

    /// Inserts when the key is empty or unknown, updates otherwise.
    ///
    /// Returns `true` when a row was inserted.
    pub async fn save<T: Model>(&mut self, entity: &mut T) -> Result<bool, Error> {
        let def = T::model_definition();
        let keys = entity.primary_key_values();
        let has_key = !keys.is_empty() && keys.iter().all(|v| !v.is_empty_key());

        if has_key && self.key_exists::<T>(&def, &keys).await? {
            self.update(entity).await?;
            return Ok(false);
        }
        match def.identity_strategy() {
            IdentityStrategy::AutoIncrement if !has_key => {
                self.insert_and_get_id(entity).await?;
            }
            _ => self.insert(entity).await?,
        }
        Ok(true)
    }

    async fn key_exists<T: Model>(&mut self, def: &ModelDefinition, keys: &[Value]) -> Result<bool, Error> {
        let query = def
            .primary_keys()
            .iter()
            .zip(keys)
            .fold(self.unfiltered::<T>(), |q, (field, value)| q.filter(col(&field.name).equals(value.clone())));
        self.exists(&query).await
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    /// Deletes the row with the entity's primary key.
    pub async fn delete<T: Model>(&mut self, entity: &T) -> Result<u64, Error> {
        let def = T::model_definition();
        let keys = def.primary_keys();
        if keys.is_empty() {
            return Err(Error::invalid_argument(format!("{} has no primary key", def.name)));
        }
        let query = keys.iter().fold(self.unfiltered::<T>(), |q, field| {
            q.filter(col(&field.name).equals(entity.get_value(&field.name).unwrap_or(Value::Null)))
        });
        self.delete_where(&query).await
    }

    pub async fn delete_where<T: Model>(&mut self, query: &SqlExpression<T>) -> Result<u64, Error> {
        let cmd = query.to_delete_statement()?;
        Ok(self.execute_command(&cmd).await?.rows_affected)
    }

    pub async fn delete_by_id<T: Model>(&mut self, id: impl ToValue) -> Result<u64, Error> {
        let key = key_field::<T>()?;
        let query = self.unfiltered::<T>().filter(col(&key).equals(id.to_value()));
        self.delete_where(&query).await
    }

    pub async fn delete_by_ids<T: Model, V: ToValue>(&mut self, ids: impl IntoIterator<Item = V>) -> Result<u64, Error> {
        let key = key_field::<T>()?;
        let ids: Vec<Value> = ids.into_iter().map(|v| v.to_value()).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let query = self.unfiltered::<T>().filter(col(&key).in_list(ids));
        self.delete_where(&query).await
    }

    /// Deletes every row of `T`.
    pub async fn delete_all<T: Model>(&mut self) -> Result<u64, Error> {
        let query = self.unfiltered::<T>();
        self.delete_where(&query).await
    }
}

// ============================================================================
// Statement Helpers
// ============================================================================

fn key_field<T: Model>() -> Result<String, Error> {
    let def = T::model_definition();
    if def.has_composite_key() {
        return Err(Error::invalid_argument(format!("{} has a composite key; filter on each key field", def.name)));
    }
    def.primary_key()
        .map(|f| f.name.clone())
        .ok_or_else(|| Error::invalid_argument(format!("{} has no primary key", def.name)))
}

fn first_value(rows: &[DataRow]) -> Option<Value> {
    rows.first().and_then(|row| row.values().first().cloned())
}

fn first_column<V: FromValue>(rows: Vec<DataRow>) -> Result<Vec<V>, Error> {
    rows.into_iter()
        .map(|row| V::from_value(row.into_values().into_iter().next().unwrap_or(Value::Null)))
        .collect()
}

/// Gives every empty `auto_id` field a fresh UUID.
fn assign_auto_ids<T: Model>(def: &ModelDefinition, entity: &mut T) -> Result<(), Error> {
    for field in def.fields.iter().filter(|f| f.auto_id) {
        let current = entity.get_value(&field.name).unwrap_or(Value::Null);
        if !current.is_empty_key() {
            continue;
        }
        let id = Uuid::new_v4();
        let value = match field.field_type {
            FieldType::Guid => Value::Uuid(id),
            _ => Value::Text(id.hyphenated().to_string()),
        };
        entity.set_value(&field.name, value)?;
    }
    Ok(())
}

/// `INSERT INTO t (cols) VALUES (params)`.
///
/// NULL fields with a column default are left out so the default applies.
pub(crate) fn insert_command<T: Model>(dialect: &dyn Dialect, def: &ModelDefinition, entity: &T) -> Command {
    let values: Vec<_> = insert_fields(def)
        .into_iter()
        .map(|f| (f, entity.get_value(&f.name).unwrap_or(Value::Null)))
        .filter(|(f, v)| !(v.is_null() && f.default_value.is_some()))
        .collect();

    let mut w = SqlWriter::new(dialect);
    w.push("INSERT INTO ").push(&dialect.get_quoted_table_name(def));
    if values.is_empty() {
        w.push(" DEFAULT VALUES");
        return w.finish();
    }

    let columns: Vec<String> = values.iter().map(|(f, _)| dialect.get_quoted_column_name(f)).collect();
    w.push(" (").push(&columns.join(", ")).push(") VALUES (");
    for (i, (field, value)) in values.into_iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push_typed_param(value, field.field_type);
    }
    w.push(")");
    w.finish()
}

/// `UPDATE t SET ... WHERE key = ...`, or `None` when there is nothing to set.
pub(crate) fn update_command<T: Model>(
    dialect: &dyn Dialect,
    def: &ModelDefinition,
    entity: &T,
) -> Result<Option<Command>, Error> {
    let keys = def.primary_keys();
    if keys.is_empty() {
        return Err(Error::invalid_argument(format!("{} has no primary key", def.name)));
    }
    let key_names: HashSet<&str> = keys.iter().map(|f| f.name.as_str()).collect();
    let fields: Vec<_> = def.writable_fields().filter(|f| !key_names.contains(f.name.as_str())).collect();
    if fields.is_empty() {
        return Ok(None);
    }

    let mut w = SqlWriter::new(dialect);
    w.push("UPDATE ").push(&dialect.get_quoted_table_name(def)).push(" SET ");
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push(&dialect.get_quoted_column_name(field)).push(" = ");
        w.push_typed_param(entity.get_value(&field.name).unwrap_or(Value::Null), field.field_type);
    }
    w.push(" WHERE ");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            w.push(" AND ");
        }
        w.push(&dialect.get_quoted_column_name(key)).push(" = ");
        w.push_typed_param(entity.get_value(&key.name).unwrap_or(Value::Null), key.field_type);
    }
    Ok(Some(w.finish()))
}
