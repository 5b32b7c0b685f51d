//! # Batch Module
//!
//! Runs independent reads concurrently, each on its own pooled connection,
//! and hands results back through typed slots.
//!
//! ```rust,ignore
//! let mut batch = db.batch();
//! let people = batch.select(db.from::<Person>());
//! let pets = batch.count(db.from::<Pet>());
//!
//! let mut results = batch.run().await?;
//! let people: Vec<Person> = results.take(people)?;
//! let pets: i64 = results.take(pets)?;
//! ```
//!
//! Results are reported in enqueue order: if several operations fail, the
//! error of the earliest one is returned.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;

use futures::future::{BoxFuture, join_all};

use crate::{
    Error,
    database::{Database, DbConnection},
    expression::SqlExpression,
    model::Model,
    value::ToValue,
};

type Operation = BoxFuture<'static, Result<Box<dyn Any + Send>, Error>>;

/// Handle to one queued operation's result.
pub struct Slot<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Slot").field(&self.index).finish()
    }
}

/// Queue of operations, created by [`Database::batch`].
pub struct Batch {
    db: Database,
    ops: Vec<Operation>,
}

impl Batch {
    pub fn new(db: Database) -> Self {
        Self { db, ops: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queues an operation that runs on a fresh connection.
    pub fn push<T, F, Fut>(&mut self, op: F) -> Slot<T>
    where
        T: Send + 'static,
        F: FnOnce(DbConnection) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let db = self.db.clone();
        self.ops.push(Box::pin(async move {
            let conn = db.open().await?;
            let value = op(conn).await?;
            Ok(Box::new(value) as Box<dyn Any + Send>)
        }));
        Slot { index: self.ops.len() - 1, _marker: PhantomData }
    }

    pub fn select<T: Model>(&mut self, query: SqlExpression<T>) -> Slot<Vec<T>> {
        self.push(move |mut conn| async move { conn.select(&query).await })
    }

    pub fn count<T: Model>(&mut self, query: SqlExpression<T>) -> Slot<i64> {
        self.push(move |mut conn| async move { conn.count(&query).await })
    }

    pub fn single_by_id<T: Model, V: ToValue + Send + 'static>(&mut self, id: V) -> Slot<Option<T>> {
        self.push(move |mut conn| async move { conn.single_by_id::<T>(id).await })
    }

    /// Runs every queued operation concurrently.
    pub async fn run(self) -> Result<BatchResults, Error> {
        log::debug!(target: crate::database::SQL_TARGET, "running batch of {} operations", self.ops.len());
        let mut values = Vec::with_capacity(self.ops.len());
        for result in join_all(self.ops).await {
            values.push(Some(result?));
        }
        Ok(BatchResults { values })
    }
}

/// Completed batch results, taken out by slot.
pub struct BatchResults {
    values: Vec<Option<Box<dyn Any + Send>>>,
}

impl BatchResults {
    /// Moves a result out. Each slot can be taken once.
    pub fn take<T: 'static>(&mut self, slot: Slot<T>) -> Result<T, Error> {
        let value = self
            .values
            .get_mut(slot.index)
            .and_then(Option::take)
            .ok_or_else(|| Error::invalid_argument(format!("batch slot {} is empty", slot.index)))?;
        value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| Error::invalid_argument(format!("batch slot {} holds another type", slot.index)))
    }
}
