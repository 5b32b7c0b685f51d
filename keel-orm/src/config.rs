//! # Configuration
//!
//! [`OrmConfig`] carries the settings the execution engine consults on every
//! call: read filters, exec/insert/update hooks, per-model select filters and
//! the default command timeout.
//!
//! A config is attached to a [`Database`](crate::Database) when it is built
//! and shared by every connection opened from it. Clones share state, so a
//! change made through any handle is seen by all of them.
//!
//! Temporary changes go through [`OrmConfig::scoped`], which snapshots the
//! settings and restores them when the guard drops:
//!
//! ```rust,ignore
//! {
//!     let _guard = db.config().scoped();
//!     db.config().set_string_filter(|s| s.trim_end().to_string());
//!     // reads here see trimmed strings
//! }
//! // previous filter is back
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::{
    Error,
    command::Command,
    expression::{Expr, col},
    model::{FieldDefinition, Model, ModelDefinition, SoftDelete},
    value::Value,
};

// ============================================================================
// Hook Types
// ============================================================================

/// Applied to every text value read from the database.
pub type StringFilter = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Supplies a replacement for a NULL column value.
pub type NullFilter = Arc<dyn Fn(&FieldDefinition) -> Option<Value> + Send + Sync>;

/// Untyped insert/update hook receiving any model through [`FieldAccess`].
pub type WriteFilter = Arc<dyn Fn(&ModelDefinition, &mut dyn FieldAccess) -> Result<(), Error> + Send + Sync>;

type TypedWriteFilter = Arc<dyn Fn(&mut dyn Any) -> Result<(), Error> + Send + Sync>;

/// Field-level access to a model instance without knowing its type.
pub trait FieldAccess {
    fn get(&self, field: &str) -> Option<Value>;
    fn set(&mut self, field: &str, value: Value) -> Result<(), Error>;
}

impl<T: Model> FieldAccess for T {
    fn get(&self, field: &str) -> Option<Value> {
        self.get_value(field)
    }

    fn set(&mut self, field: &str, value: Value) -> Result<(), Error> {
        self.set_value(field, value)
    }
}

/// Whether a command should reach the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecControl {
    Proceed,
    /// Skip execution: reads return no rows, writes report zero rows affected.
    Skip,
}

/// Intercepts every command the engine executes.
pub trait ExecFilter: Send + Sync {
    fn before_execute(&self, _cmd: &Command) -> Result<ExecControl, Error> {
        Ok(ExecControl::Proceed)
    }

    fn after_execute(&self, _cmd: &Command, _elapsed: Duration) {}

    /// Receives the failed command. The error still propagates to the caller.
    fn on_error(&self, _cmd: &Command, _err: &Error) {}
}

/// Records commands instead of running them.
///
/// Useful to inspect the SQL an operation would issue.
#[derive(Debug, Clone, Default)]
pub struct CaptureSqlFilter {
    captured: Arc<Mutex<Vec<Command>>>,
}

impl CaptureSqlFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.captured.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn sql(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c.sql).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut captured) = self.captured.lock() {
            captured.clear();
        }
    }
}

impl ExecFilter for CaptureSqlFilter {
    fn before_execute(&self, cmd: &Command) -> Result<ExecControl, Error> {
        if let Ok(mut captured) = self.captured.lock() {
            captured.push(cmd.clone());
        }
        Ok(ExecControl::Skip)
    }
}

// ============================================================================
// Config State
// ============================================================================

#[derive(Clone, Default)]
struct ConfigState {
    string_filter: Option<StringFilter>,
    null_filter: Option<NullFilter>,
    exec_filter: Option<Arc<dyn ExecFilter>>,
    insert_filter: Option<WriteFilter>,
    update_filter: Option<WriteFilter>,
    typed_insert_filters: HashMap<TypeId, Vec<TypedWriteFilter>>,
    typed_update_filters: HashMap<TypeId, Vec<TypedWriteFilter>>,
    select_filters: HashMap<TypeId, Vec<Expr>>,
    command_timeout: Option<Duration>,
}

/// Shared, mutable ORM settings.
#[derive(Clone, Default)]
pub struct OrmConfig {
    inner: Arc<RwLock<ConfigState>>,
}

impl fmt::Debug for OrmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("OrmConfig")
            .field("string_filter", &state.string_filter.is_some())
            .field("null_filter", &state.null_filter.is_some())
            .field("exec_filter", &state.exec_filter.is_some())
            .field("select_filters", &state.select_filters.len())
            .field("command_timeout", &state.command_timeout)
            .finish()
    }
}

impl OrmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ConfigState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConfigState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshots the current settings; they are restored when the guard drops.
    pub fn scoped(&self) -> ConfigGuard {
        ConfigGuard { config: self.clone(), saved: Some(self.read().clone()) }
    }

    // ------------------------------------------------------------------------
    // Read filters
    // ------------------------------------------------------------------------

    pub fn set_string_filter(&self, filter: impl Fn(&str) -> String + Send + Sync + 'static) {
        self.write().string_filter = Some(Arc::new(filter));
    }

    pub fn clear_string_filter(&self) {
        self.write().string_filter = None;
    }

    pub fn set_null_filter(&self, filter: impl Fn(&FieldDefinition) -> Option<Value> + Send + Sync + 'static) {
        self.write().null_filter = Some(Arc::new(filter));
    }

    pub fn clear_null_filter(&self) {
        self.write().null_filter = None;
    }

    pub(crate) fn read_filters(&self) -> ReadFilters {
        let state = self.read();
        ReadFilters::new(state.string_filter.clone(), state.null_filter.clone())
    }

    // ------------------------------------------------------------------------
    // Exec filter
    // ------------------------------------------------------------------------

    pub fn set_exec_filter(&self, filter: Arc<dyn ExecFilter>) {
        self.write().exec_filter = Some(filter);
    }

    pub fn clear_exec_filter(&self) {
        self.write().exec_filter = None;
    }

    pub(crate) fn exec_filter(&self) -> Option<Arc<dyn ExecFilter>> {
        self.read().exec_filter.clone()
    }

    // ------------------------------------------------------------------------
    // Write filters
    // ------------------------------------------------------------------------

    /// Runs before every insert, for every model type.
    pub fn set_insert_filter(
        &self,
        filter: impl Fn(&ModelDefinition, &mut dyn FieldAccess) -> Result<(), Error> + Send + Sync + 'static,
    ) {
        self.write().insert_filter = Some(Arc::new(filter));
    }

    /// Runs before every update, for every model type.
    pub fn set_update_filter(
        &self,
        filter: impl Fn(&ModelDefinition, &mut dyn FieldAccess) -> Result<(), Error> + Send + Sync + 'static,
    ) {
        self.write().update_filter = Some(Arc::new(filter));
    }

    pub fn clear_write_filters(&self) {
        let mut state = self.write();
        state.insert_filter = None;
        state.update_filter = None;
        state.typed_insert_filters.clear();
        state.typed_update_filters.clear();
    }

    /// Runs before each insert of a `T`, after the global insert filter.
    pub fn insert_filter_for<T: Model>(&self, filter: impl Fn(&mut T) -> Result<(), Error> + Send + Sync + 'static) {
        let filter = typed(filter);
        self.write().typed_insert_filters.entry(TypeId::of::<T>()).or_default().push(filter);
    }

    /// Runs before each update of a `T`, after the global update filter.
    pub fn update_filter_for<T: Model>(&self, filter: impl Fn(&mut T) -> Result<(), Error> + Send + Sync + 'static) {
        let filter = typed(filter);
        self.write().typed_update_filters.entry(TypeId::of::<T>()).or_default().push(filter);
    }

    pub(crate) fn apply_insert_filters<T: Model>(&self, def: &ModelDefinition, entity: &mut T) -> Result<(), Error> {
        let (global, typed) = {
            let state = self.read();
            (state.insert_filter.clone(), state.typed_insert_filters.get(&TypeId::of::<T>()).cloned())
        };
        run_write_filters(def, entity, global, typed)
    }

    pub(crate) fn apply_update_filters<T: Model>(&self, def: &ModelDefinition, entity: &mut T) -> Result<(), Error> {
        let (global, typed) = {
            let state = self.read();
            (state.update_filter.clone(), state.typed_update_filters.get(&TypeId::of::<T>()).cloned())
        };
        run_write_filters(def, entity, global, typed)
    }

    // ------------------------------------------------------------------------
    // Select filters
    // ------------------------------------------------------------------------

    /// Adds a predicate ensured on every query started with `from::<T>()`.
    pub fn select_filter<T: Model>(&self, predicate: Expr) {
        self.write().select_filters.entry(TypeId::of::<T>()).or_default().push(predicate);
    }

    /// Hides soft-deleted rows of `T` from queries and reference loads.
    pub fn soft_delete<T: SoftDelete>(&self) {
        self.select_filter::<T>(col(T::SOFT_DELETE_FIELD).equals(false));
    }

    pub fn clear_select_filters<T: Model>(&self) {
        self.write().select_filters.remove(&TypeId::of::<T>());
    }

    pub(crate) fn select_filters(&self, type_id: TypeId) -> Vec<Expr> {
        self.read().select_filters.get(&type_id).cloned().unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Timeout
    // ------------------------------------------------------------------------

    pub fn set_command_timeout(&self, timeout: Option<Duration>) {
        self.write().command_timeout = timeout;
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.read().command_timeout
    }
}

fn typed<T: Model>(filter: impl Fn(&mut T) -> Result<(), Error> + Send + Sync + 'static) -> TypedWriteFilter {
    Arc::new(move |entity: &mut dyn Any| match entity.downcast_mut::<T>() {
        Some(entity) => filter(entity),
        None => Ok(()),
    })
}

fn run_write_filters<T: Model>(
    def: &ModelDefinition,
    entity: &mut T,
    global: Option<WriteFilter>,
    typed: Option<Vec<TypedWriteFilter>>,
) -> Result<(), Error> {
    if let Some(filter) = global {
        filter(def, entity).map_err(into_filter_error)?;
    }
    for filter in typed.unwrap_or_default() {
        filter(entity).map_err(into_filter_error)?;
    }
    Ok(())
}

fn into_filter_error(err: Error) -> Error {
    match err {
        Error::Filter(_) => err,
        other => Error::Filter(other.to_string()),
    }
}

// ============================================================================
// Read Filters
// ============================================================================

/// The read-side settings, copied once per query.
#[derive(Clone, Default)]
pub struct ReadFilters {
    string_filter: Option<StringFilter>,
    null_filter: Option<NullFilter>,
}

impl ReadFilters {
    pub fn new(string_filter: Option<StringFilter>, null_filter: Option<NullFilter>) -> Self {
        Self { string_filter, null_filter }
    }

    pub(crate) fn filter_string(&self, text: String) -> String {
        match &self.string_filter {
            Some(filter) => filter(&text),
            None => text,
        }
    }

    pub(crate) fn substitute_null(&self, field: &FieldDefinition) -> Option<Value> {
        self.null_filter.as_ref().and_then(|filter| filter(field))
    }
}

// ============================================================================
// Scoped Guard
// ============================================================================

/// Restores the settings captured by [`OrmConfig::scoped`] when dropped.
pub struct ConfigGuard {
    config: OrmConfig,
    saved: Option<ConfigState>,
}

impl Drop for ConfigGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.config.write() = saved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previous_settings() {
        let config = OrmConfig::new();
        config.set_command_timeout(Some(Duration::from_secs(30)));
        {
            let _guard = config.scoped();
            config.set_command_timeout(Some(Duration::from_secs(1)));
            config.set_string_filter(|s| s.to_uppercase());
            assert_eq!(config.command_timeout(), Some(Duration::from_secs(1)));
            assert_eq!(config.read_filters().filter_string("ab".into()), "AB");
        }
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.read_filters().filter_string("ab".into()), "ab");
    }

    #[test]
    fn capture_filter_records_and_skips() {
        let capture = CaptureSqlFilter::new();
        let cmd = Command::new("DELETE FROM t");
        assert_eq!(capture.before_execute(&cmd).unwrap(), ExecControl::Skip);
        assert_eq!(capture.sql(), vec!["DELETE FROM t".to_string()]);
        capture.clear();
        assert!(capture.commands().is_empty());
    }

    #[test]
    fn clones_share_state() {
        let config = OrmConfig::new();
        let other = config.clone();
        other.set_command_timeout(Some(Duration::from_millis(5)));
        assert_eq!(config.command_timeout(), Some(Duration::from_millis(5)));
    }
}
