//! # Database Module
//!
//! [`Database`] owns the connection pool, the dialect and the configuration.
//! Work happens on a [`DbConnection`] checked out of the pool: every query,
//! write, DDL statement and transaction runs through one connection so that
//! statements issued in sequence execute in that order on the same session.
//!
//! ```rust,ignore
//! use keel_orm::Database;
//!
//! let db = Database::builder()
//!     .max_connections(1)
//!     .connect("sqlite::memory:")
//!     .await?;
//!
//! db.migrator().register::<Person>().run().await?;
//!
//! let mut conn = db.open().await?;
//! conn.insert(&mut person).await?;
//! let adults = conn.select(&db.from::<Person>().filter(col("age").ge(18))).await?;
//! ```
//!
//! ## Write locking
//!
//! File and in-memory SQLite stores accept one writer at a time. Every
//! [`Database`] pointing at the same store shares one write mutex, keyed by
//! the normalized connection target. A plain `sqlite::memory:` database is
//! private to its pool and gets a mutex of its own. The mutex is held for
//! each write outside a transaction and for the whole life of a
//! transaction. Reads never take it.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::{Duration, Instant};

use sqlx::any::{AnyArguments, AnyPoolOptions, AnyQueryResult};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, AnyPool, Executor};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Error,
    batch::Batch,
    command::Command,
    config::{ExecControl, OrmConfig, ReadFilters},
    dialect::{Dialect, DialectKind},
    expression::SqlExpression,
    migration::Migrator,
    model::{FromDataRow, Model},
    naming::NamingStrategy,
    row::{DataRow, RowReader},
    value_binding::bind_command,
};

pub(crate) const SQL_TARGET: &str = "keel_orm::sql";

// ============================================================================
// Write Lock Registry
// ============================================================================

type LockRegistry = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

fn lock_registry() -> &'static LockRegistry {
    static REGISTRY: OnceLock<LockRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()))
}

/// The write mutex for a physical store. Equal targets share one mutex.
fn write_lock_for(target: &str) -> Arc<Mutex<()>> {
    match lock_registry().lock() {
        Ok(mut registry) => Arc::clone(registry.entry(target.to_string()).or_default()),
        Err(_) => Arc::new(Mutex::new(())),
    }
}

/// Reduces a SQLite URL to the identity of the store it opens.
///
/// `sqlite://data.db?mode=rwc` and `sqlite:./data.db` both become the
/// canonical path of `data.db` when the file exists. Anonymous in-memory
/// stores have no identity: every pool opening one gets a private database.
/// Named in-memory stores with `cache=shared` are keyed by their name.
pub(crate) fn normalize_target(url: &str) -> Option<String> {
    let lower = url.to_lowercase();
    let rest = if lower.starts_with("sqlite://") {
        &url["sqlite://".len()..]
    } else if lower.starts_with("sqlite:") {
        &url["sqlite:".len()..]
    } else {
        return Some(url.to_string());
    };
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    let options: Vec<&str> = query.split('&').collect();
    let in_memory = path.is_empty()
        || path == ":memory:"
        || path.eq_ignore_ascii_case("file::memory:")
        || options.iter().any(|o| o.eq_ignore_ascii_case("mode=memory"));
    if in_memory {
        let shared = options.iter().any(|o| o.eq_ignore_ascii_case("cache=shared"));
        return shared.then(|| format!("sqlite:{}", path));
    }
    let path = path.strip_prefix("file:").unwrap_or(path);
    match std::fs::canonicalize(path) {
        Ok(canonical) => Some(format!("sqlite:{}", canonical.display())),
        Err(_) => Some(format!("sqlite:{}", path)),
    }
}

// ============================================================================
// Database
// ============================================================================

struct DatabaseInner {
    pool: AnyPool,
    dialect: Arc<dyn Dialect>,
    config: OrmConfig,
    write_lock: Option<Arc<Mutex<()>>>,
}

/// A pooled database with its dialect and configuration. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.inner.dialect.kind())
            .field("serialized_writes", &self.inner.write_lock.is_some())
            .finish()
    }
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::default()
    }

    /// Connects with default settings, detecting the dialect from the URL.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        Self::builder().connect(url).await
    }

    /// Checks a connection out of the pool.
    pub async fn open(&self) -> Result<DbConnection, Error> {
        let conn = self.inner.pool.acquire().await?;
        Ok(DbConnection {
            conn: Some(conn),
            dialect: Arc::clone(&self.inner.dialect),
            config: self.inner.config.clone(),
            write_lock: self.inner.write_lock.clone(),
            tx_guard: None,
            tx_depth: 0,
            rollback_only: false,
            pending: Vec::new(),
            last_sql: None,
            timeout_override: None,
        })
    }

    /// Starts a query on `T` with its registered select filters applied.
    pub fn from<T: Model>(&self) -> SqlExpression<T> {
        filtered_expression(&self.inner.dialect, &self.inner.config)
    }

    pub fn migrator(&self) -> Migrator<'_> {
        Migrator::new(self)
    }

    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.inner.dialect
    }

    pub fn config(&self) -> &OrmConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &AnyPool {
        &self.inner.pool
    }
}

fn filtered_expression<T: Model>(dialect: &Arc<dyn Dialect>, config: &OrmConfig) -> SqlExpression<T> {
    config
        .select_filters(std::any::TypeId::of::<T>())
        .into_iter()
        .fold(SqlExpression::new(Arc::clone(dialect)), |q, predicate| q.ensure(predicate))
}

/// Builder for [`Database`].
#[derive(Default)]
pub struct DatabaseBuilder {
    max_connections: Option<u32>,
    dialect: Option<DialectKind>,
    naming: Option<Arc<dyn NamingStrategy>>,
    config: Option<OrmConfig>,
    serialize_writes: Option<bool>,
}

impl DatabaseBuilder {
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Overrides the dialect detected from the URL.
    ///
    /// Commands for dialects without a driver are generated but can only be
    /// observed through an exec filter.
    pub fn dialect(mut self, kind: DialectKind) -> Self {
        self.dialect = Some(kind);
        self
    }

    pub fn naming(mut self, naming: impl NamingStrategy + 'static) -> Self {
        self.naming = Some(Arc::new(naming));
        self
    }

    pub fn config(mut self, config: OrmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Serializes writes through the shared write mutex. On by default for SQLite.
    pub fn serialize_writes(mut self, enabled: bool) -> Self {
        self.serialize_writes = Some(enabled);
        self
    }

    pub async fn connect(self, url: &str) -> Result<Database, Error> {
        sqlx::any::install_default_drivers();

        let detected = DialectKind::from_url(url)
            .ok_or_else(|| Error::invalid_argument(format!("cannot detect a dialect from '{}'", url)))?;
        let kind = self.dialect.unwrap_or(detected);
        let dialect = match self.naming {
            Some(naming) => kind.with_naming(naming),
            None => kind.dialect(),
        };

        let pool = AnyPoolOptions::new().max_connections(self.max_connections.unwrap_or(5)).connect(url).await?;

        let serialize = self.serialize_writes.unwrap_or(detected == DialectKind::Sqlite);
        let write_lock = serialize.then(|| match normalize_target(url) {
            Some(target) => write_lock_for(&target),
            None => Arc::new(Mutex::new(())),
        });

        log::debug!(target: SQL_TARGET, "connected {:?} database (dialect {:?})", detected, kind);

        Ok(Database {
            inner: Arc::new(DatabaseInner { pool, dialect, config: self.config.unwrap_or_default(), write_lock }),
        })
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Result of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

#[derive(Clone, Copy)]
enum Fetch {
    Execute,
    Rows,
}

#[derive(Default)]
struct Output {
    outcome: ExecOutcome,
    rows: Vec<DataRow>,
}

/// One pooled connection plus its transaction state.
///
/// Dropping a connection with an open transaction rolls it back.
pub struct DbConnection {
    conn: Option<PoolConnection<Any>>,
    dialect: Arc<dyn Dialect>,
    config: OrmConfig,
    write_lock: Option<Arc<Mutex<()>>>,
    tx_guard: Option<OwnedMutexGuard<()>>,
    pub(crate) tx_depth: usize,
    pub(crate) rollback_only: bool,
    /// Statements queued by dropped transaction scopes, run before the next command.
    pending: Vec<String>,
    last_sql: Option<String>,
    timeout_override: Option<Duration>,
}

impl fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("dialect", &self.dialect.kind())
            .field("tx_depth", &self.tx_depth)
            .field("last_sql", &self.last_sql)
            .finish()
    }
}

impl DbConnection {
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    /// SQL of the most recent command, including ones skipped by a filter.
    pub fn last_sql(&self) -> Option<&str> {
        self.last_sql.as_deref()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_depth > 0
    }

    /// Starts a query on `T` with its registered select filters applied.
    pub fn from<T: Model>(&self) -> SqlExpression<T> {
        filtered_expression(&self.dialect, &self.config)
    }

    /// A query on `T` without select filters.
    pub(crate) fn unfiltered<T: Model>(&self) -> SqlExpression<T> {
        SqlExpression::new(Arc::clone(&self.dialect))
    }

    /// Overrides the command timeout until the returned scope drops.
    pub fn with_timeout(&mut self, timeout: Duration) -> TimeoutScope<'_> {
        self.timeout_override = Some(timeout);
        TimeoutScope { conn: self }
    }

    pub(crate) fn read_filters(&self) -> ReadFilters {
        self.config.read_filters()
    }

    /// Materializes rows as `R`, applying the configured read filters.
    pub(crate) fn materialize<R: FromDataRow>(&self, rows: &[DataRow]) -> Result<Vec<R>, Error> {
        let filters = self.read_filters();
        rows.iter()
            .map(|row| R::from_data_row(&RowReader::new(row, self.dialect.as_ref()).with_filters(&filters)))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Runs a statement that returns no rows.
    pub async fn execute_command(&mut self, cmd: &Command) -> Result<ExecOutcome, Error> {
        Ok(self.run(cmd, Fetch::Execute, true).await?.outcome)
    }

    /// Runs a query and copies out every row.
    pub async fn fetch_rows(&mut self, cmd: &Command) -> Result<Vec<DataRow>, Error> {
        Ok(self.run(cmd, Fetch::Rows, false).await?.rows)
    }

    /// Runs a statement that writes and returns rows (`RETURNING`).
    pub(crate) async fn fetch_written_rows(&mut self, cmd: &Command) -> Result<Vec<DataRow>, Error> {
        Ok(self.run(cmd, Fetch::Rows, true).await?.rows)
    }

    /// Runs a DDL or hook statement, logged at info level.
    pub(crate) async fn execute_ddl(&mut self, sql: &str) -> Result<(), Error> {
        log::info!(target: SQL_TARGET, "{}", sql);
        self.execute_command(&Command::new(sql)).await.map(|_| ())
    }

    async fn run(&mut self, cmd: &Command, fetch: Fetch, write: bool) -> Result<Output, Error> {
        self.flush_pending().await?;

        let filter = self.config.exec_filter();
        self.last_sql = Some(cmd.sql.clone());
        if let Some(filter) = &filter {
            if filter.before_execute(cmd)? == ExecControl::Skip {
                log::debug!(target: SQL_TARGET, "skipped by exec filter: {}", cmd.sql);
                return Ok(Output::default());
            }
        }
        log::debug!(target: SQL_TARGET, "{}", cmd.sql);

        let kind = self.dialect.kind();
        if !kind.is_executable() {
            return Err(Error::unsupported(format!("executing {:?} commands", kind)));
        }
        let args = bind_command(cmd, kind)?;

        let _write_guard = match (&self.write_lock, write && self.tx_guard.is_none()) {
            (Some(lock), true) => Some(Arc::clone(lock).lock_owned().await),
            _ => None,
        };

        let timeout = self.timeout_override.or_else(|| self.config.command_timeout());
        let started = Instant::now();
        let conn = self.conn.as_mut().ok_or_else(|| Error::invalid_data("connection already released"))?;
        let work = perform(&mut **conn, cmd, args, fetch);

        let result: Result<Output, Error> = match timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.unwrap_or(Err(Error::Timeout(limit))),
            None => work.await,
        };

        match result {
            Ok(output) => {
                if let Some(filter) = &filter {
                    filter.after_execute(cmd, started.elapsed());
                }
                Ok(output)
            }
            Err(err) => {
                log::debug!(target: SQL_TARGET, "command failed: {}", err);
                if let Some(filter) = &filter {
                    filter.on_error(cmd, &err);
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transaction plumbing
    // ------------------------------------------------------------------------

    /// Runs statements queued by transaction scopes that were dropped.
    pub(crate) async fn flush_pending(&mut self) -> Result<(), Error> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let conn = self.conn.as_mut().ok_or_else(|| Error::invalid_data("connection already released"))?;
        for sql in pending {
            log::warn!(target: SQL_TARGET, "running deferred rollback: {}", sql);
            Executor::execute(&mut **conn, sqlx::raw_sql(&sql)).await?;
        }
        if self.tx_depth == 0 {
            self.tx_guard = None;
        }
        Ok(())
    }

    /// Runs a transaction control statement.
    pub(crate) async fn control(&mut self, sql: &str) -> Result<(), Error> {
        self.execute_command(&Command::new(sql)).await.map(|_| ())
    }

    pub(crate) async fn acquire_tx_lock(&mut self) {
        if self.tx_guard.is_none() {
            if let Some(lock) = &self.write_lock {
                self.tx_guard = Some(Arc::clone(lock).lock_owned().await);
            }
        }
    }

    pub(crate) fn release_tx_lock(&mut self) {
        self.tx_guard = None;
    }

    /// Queues a statement to run before the next command on this connection.
    pub(crate) fn defer(&mut self, sql: String) {
        self.pending.push(sql);
    }
}

async fn perform(
    conn: &mut AnyConnection,
    cmd: &Command,
    args: AnyArguments<'static>,
    fetch: Fetch,
) -> Result<Output, Error> {
    let outcome = |r: AnyQueryResult| Output {
        outcome: ExecOutcome { rows_affected: r.rows_affected(), last_insert_id: r.last_insert_id() },
        rows: Vec::new(),
    };
    match fetch {
        // Parameterless statements skip the prepare step (DDL, transaction control).
        Fetch::Execute if cmd.params.is_empty() => {
            Ok(outcome(Executor::execute(&mut *conn, sqlx::raw_sql(&cmd.sql)).await?))
        }
        Fetch::Execute => Ok(outcome(Executor::execute(&mut *conn, sqlx::query_with(&cmd.sql, args)).await?)),
        Fetch::Rows => {
            let rows = Executor::fetch_all(&mut *conn, sqlx::query_with(&cmd.sql, args)).await?;
            let Some(first) = rows.first() else { return Ok(Output::default()) };
            let columns = DataRow::column_names(first);
            let rows = rows
                .iter()
                .map(|row| DataRow::from_any_row(row, Arc::clone(&columns)))
                .collect::<Result<Vec<_>, Error>>()?;
            Ok(Output { outcome: ExecOutcome::default(), rows })
        }
    }
}

impl Drop for DbConnection {
    fn drop(&mut self) {
        if self.tx_depth == 0 && self.pending.is_empty() {
            return;
        }
        let Some(mut conn) = self.conn.take() else { return };
        let rollback = self.dialect.rollback_sql();
        let guard = self.tx_guard.take();
        log::warn!(target: SQL_TARGET, "connection dropped inside a transaction; rolling back");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let result = Executor::execute(&mut *conn, sqlx::raw_sql(rollback)).await;
                    if let Err(err) = result {
                        log::warn!(target: SQL_TARGET, "rollback on drop failed: {}", err);
                        let _ = conn.detach();
                    }
                    drop(guard);
                });
            }
            Err(_) => {
                // Without a runtime the session cannot be cleaned; close it instead of pooling it.
                let _ = conn.detach();
            }
        }
    }
}

/// A connection with a temporary command timeout. Derefs to the connection.
pub struct TimeoutScope<'c> {
    conn: &'c mut DbConnection,
}

impl Deref for TimeoutScope<'_> {
    type Target = DbConnection;

    fn deref(&self) -> &DbConnection {
        self.conn
    }
}

impl DerefMut for TimeoutScope<'_> {
    fn deref_mut(&mut self) -> &mut DbConnection {
        self.conn
    }
}

impl Drop for TimeoutScope<'_> {
    fn drop(&mut self) {
        self.conn.timeout_override = None;
    }
}
