//! # Transaction Module
//!
//! Scoped transactions on a [`DbConnection`].
//!
//! Only the outermost scope issues `BEGIN`, `COMMIT` and `ROLLBACK`. Nested
//! scopes become savepoints where the dialect supports them; elsewhere an
//! inner rollback marks the whole transaction rollback-only, and the outer
//! commit then rolls back and reports an error.
//!
//! A scope dropped without `commit` or `rollback` queues its rollback, which
//! runs before the next command on the connection (or when the connection is
//! dropped).
//!
//! ```rust,ignore
//! let mut tx = conn.begin().await?;
//! tx.insert(&mut order).await?;
//! {
//!     let mut inner = tx.begin().await?;
//!     inner.insert(&mut line).await?;
//!     inner.rollback().await?; // only the line is undone
//! }
//! tx.commit().await?;
//! ```

use std::ops::{Deref, DerefMut};

use crate::{Error, database::DbConnection, database::SQL_TARGET};

/// One transaction scope. Derefs to the connection it runs on.
#[derive(Debug)]
pub struct Transaction<'c> {
    conn: &'c mut DbConnection,
    depth: usize,
    savepoint: Option<String>,
    done: bool,
}

impl DbConnection {
    /// Opens a transaction, or a nested scope inside the current one.
    pub async fn begin(&mut self) -> Result<Transaction<'_>, Error> {
        let depth = self.tx_depth + 1;
        let mut savepoint = None;

        if depth == 1 {
            self.flush_pending().await?;
            self.acquire_tx_lock().await;
            let begin = self.dialect().begin_transaction_sql();
            if let Err(err) = self.control(begin).await {
                self.release_tx_lock();
                return Err(err);
            }
            self.rollback_only = false;
        } else if self.dialect().capabilities().savepoints {
            let name = format!("sp_{}", depth);
            let sql = self.dialect().to_savepoint(&name);
            self.control(&sql).await?;
            savepoint = Some(name);
        }

        self.tx_depth = depth;
        log::debug!(target: SQL_TARGET, "transaction scope {} opened", depth);
        Ok(Transaction { conn: self, depth, savepoint, done: false })
    }
}

impl<'c> Transaction<'c> {
    /// Nesting level, 1 for the outermost scope.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }

    pub async fn commit(mut self) -> Result<(), Error> {
        self.done = true;
        if !self.is_outermost() {
            if let Some(name) = &self.savepoint {
                if let Some(sql) = self.conn.dialect().to_release_savepoint(name) {
                    self.conn.control(&sql).await?;
                }
            }
            self.conn.tx_depth -= 1;
            return Ok(());
        }

        let rollback_only = self.conn.rollback_only;
        let outcome = if rollback_only {
            let rollback = self.conn.dialect().rollback_sql();
            self.conn
                .control(rollback)
                .await
                .and(Err(Error::invalid_data("transaction rolled back: an inner scope was rolled back")))
        } else {
            let commit = self.conn.dialect().commit_sql();
            self.conn.control(commit).await
        };
        if outcome.is_err() && !rollback_only {
            // COMMIT itself failed; leave the rollback to Drop.
            self.done = false;
            return outcome;
        }
        self.finish_outermost();
        outcome
    }

    pub async fn rollback(mut self) -> Result<(), Error> {
        self.done = true;
        if self.is_outermost() {
            let rollback = self.conn.dialect().rollback_sql();
            let result = self.conn.control(rollback).await;
            self.finish_outermost();
            return result;
        }

        self.conn.tx_depth -= 1;
        match &self.savepoint {
            Some(name) => {
                let sql = self.conn.dialect().to_rollback_to_savepoint(name);
                self.conn.control(&sql).await
            }
            None => {
                log::warn!(target: SQL_TARGET, "nested rollback without savepoints; transaction marked rollback-only");
                self.conn.rollback_only = true;
                Ok(())
            }
        }
    }

    fn finish_outermost(&mut self) {
        self.conn.tx_depth = 0;
        self.conn.rollback_only = false;
        self.conn.release_tx_lock();
    }
}

impl Deref for Transaction<'_> {
    type Target = DbConnection;

    fn deref(&self) -> &DbConnection {
        self.conn
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut DbConnection {
        self.conn
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        log::warn!(target: SQL_TARGET, "transaction scope {} dropped without commit; rolling back", self.depth);
        if self.is_outermost() {
            let rollback = self.conn.dialect().rollback_sql().to_string();
            self.conn.defer(rollback);
            self.conn.tx_depth = 0;
            self.conn.rollback_only = false;
            return;
        }
        self.conn.tx_depth -= 1;
        match &self.savepoint {
            Some(name) => {
                let sql = self.conn.dialect().to_rollback_to_savepoint(name);
                self.conn.defer(sql);
            }
            None => self.conn.rollback_only = true,
        }
    }
}
