//! # Migration Module
//!
//! Creates the tables of registered models, in registration order, on one
//! connection. Tables that already exist are left alone, so running the same
//! migrator twice is a no-op.
//!
//! Foreign keys are declared inside `CREATE TABLE`, so register referenced
//! models before the models that point at them.
//!
//! ```rust,ignore
//! use keel_orm::{Database, Model};
//!
//! #[derive(Model)]
//! struct Owner {
//!     #[orm(primary_key, auto_increment)]
//!     id: i64,
//!     name: String,
//! }
//!
//! #[derive(Model)]
//! struct Pet {
//!     #[orm(primary_key, auto_increment)]
//!     id: i64,
//!     #[orm(foreign_key = "Owner", on_delete = "cascade")]
//!     owner_id: i64,
//!     name: String,
//! }
//!
//! let db = Database::connect("sqlite::memory:").await?;
//! db.migrator().register::<Owner>().register::<Pet>().run().await?;
//! ```

use futures::future::BoxFuture;

use crate::{Error, database::Database, database::DbConnection, model::Model};

/// One migration step run against an open connection.
pub type MigrationTask = for<'c> fn(&'c mut DbConnection) -> BoxFuture<'c, Result<(), Error>>;

/// Schema migration manager, created by [`Database::migrator`].
pub struct Migrator<'a> {
    db: &'a Database,
    tasks: Vec<(&'static str, MigrationTask)>,
}

impl<'a> Migrator<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db, tasks: Vec::new() }
    }

    /// Queues table creation for `T`.
    pub fn register<T: Model>(mut self) -> Self {
        self.tasks.push((std::any::type_name::<T>(), create_task::<T>));
        self
    }

    /// Queues a custom step, run in order with the table steps.
    pub fn step(mut self, name: &'static str, task: MigrationTask) -> Self {
        self.tasks.push((name, task));
        self
    }

    /// Runs every queued step. The first failure aborts the run.
    pub async fn run(self) -> Result<Database, Error> {
        let mut conn = self.db.open().await?;
        for (name, task) in self.tasks {
            log::info!(target: crate::database::SQL_TARGET, "migrating {}", name);
            (task)(&mut conn).await?;
        }
        Ok(self.db.clone())
    }
}

fn create_task<T: Model>(conn: &mut DbConnection) -> BoxFuture<'_, Result<(), Error>> {
    Box::pin(async move {
        conn.create_table_if_not_exists::<T>().await?;
        Ok(())
    })
}
