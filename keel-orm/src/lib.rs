//! # Keel ORM
//!
//! A dialect-aware object/relational mapper on top of `sqlx`.
//!
//! Models are plain structs with `#[derive(Model)]`. Their definitions drive
//! SQL generation for six backends (SQLite, PostgreSQL, MySQL, SQL Server,
//! Oracle and Firebird); statements run through `sqlx`'s `Any` driver on the
//! backends it can reach (SQLite, PostgreSQL, MySQL). The remaining dialects
//! still generate SQL, which can be captured with [`CaptureSqlFilter`].
//!
//! ```rust,ignore
//! use keel_orm::{Database, Model, col};
//!
//! #[derive(Model, Debug)]
//! struct Person {
//!     #[orm(primary_key, auto_increment)]
//!     id: i64,
//!     #[orm(length = 100)]
//!     name: String,
//!     age: i32,
//! }
//!
//! let db = Database::builder().max_connections(1).connect("sqlite::memory:").await?;
//! db.migrator().register::<Person>().run().await?;
//!
//! let mut conn = db.open().await?;
//! let mut ada = Person { id: 0, name: "Ada".into(), age: 36 };
//! conn.insert_and_get_id(&mut ada).await?;
//!
//! let adults = conn.select(&conn.from::<Person>().filter(col(person_fields::AGE).ge(18))).await?;
//! ```

extern crate self as keel_orm;

pub use keel_orm_macro::{FromRow, Model, SqlEnum};

pub mod batch;
pub mod catalog;
pub mod command;
pub mod config;
mod crud;
pub mod database;
pub mod dialect;
pub mod errors;
pub mod expression;
pub mod migration;
pub mod model;
pub mod naming;
pub mod pagination;
pub mod reference;
pub mod row;
mod schema;
pub mod temporal;
pub mod transaction;
pub mod value;
pub mod value_binding;

pub use batch::{Batch, BatchResults, Slot};
pub use command::{Command, SqlWriter};
pub use config::{CaptureSqlFilter, ConfigGuard, ExecControl, ExecFilter, FieldAccess, OrmConfig};
pub use database::{Database, DatabaseBuilder, DbConnection, ExecOutcome, TimeoutScope};
pub use dialect::{Dialect, DialectCapabilities, DialectKind, IdentityFetch, OnConflict};
pub use errors::{ConstraintKind, Error};
pub use expression::{Expr, JoinKind, Sql, SqlExpression, col, col_in, col_of, val};
pub use migration::Migrator;
pub use model::{
    CompositeIndex, FieldDefinition, ForeignKey, FromDataRow, IdentityStrategy, Model, ModelDefinition, ModelRef,
    ReferenceDefinition, ReferentialAction, SoftDelete, UniqueConstraint,
};
pub use naming::NamingStrategy;
pub use pagination::{Page, Pagination};
pub use reference::{References, load_many, load_one, merge, merge_reference, save_children, save_parent};
pub use row::{DataRow, MultiModel, RowReader};
pub use transaction::Transaction;
pub use value::{DbType, FieldType, FromValue, Json, ToValue, Value};

#[doc(hidden)]
pub use async_trait;
