//! # Error Handling Module
//!
//! This module defines the error type shared by every layer of Keel ORM.
//!
//! ## Error Types
//!
//! - **InvalidData / InvalidArgument / Conversion**: validation and type conversion failures
//! - **DatabaseError**: driver errors that could not be classified further
//! - **ConstraintViolation**: unique, check, foreign-key and not-null violations
//! - **Mapping**: a row could not be materialized into the requested type
//! - **Filter**: an insert, update or exec filter aborted the command
//! - **Timeout**: a command ran past its timeout
//! - **Unsupported**: the dialect cannot express the requested operation
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use keel_orm::{ConstraintKind, Error};
//!
//! match conn.insert(&mut person).await {
//!     Ok(()) => {}
//!     Err(Error::ConstraintViolation { kind: ConstraintKind::Check, detail }) => {
//!         eprintln!("rejected by check constraint: {}", detail);
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```
//!
//! Constraint classification is best-effort. Drivers report violations with
//! provider-specific codes and messages, and anything the classifier does not
//! recognise stays a plain `DatabaseError`.

// ============================================================================
// External Crate Imports
// ============================================================================

use std::time::Duration;

use sqlx::error::ErrorKind;
use thiserror::Error;

// ============================================================================
// Constraint Kinds
// ============================================================================

/// The kind of integrity constraint a failed statement violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Unique,
    Check,
    ForeignKey,
    NotNull,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::Check => "check",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Error Enum Definition
// ============================================================================

/// The main error type for Keel ORM operations.
///
/// Driver errors are converted through [`Error::from_sqlx`] (also used by the
/// `From<sqlx::Error>` impl) which tries to recognise constraint violations
/// first and falls back to `DatabaseError`.
#[derive(Error, Debug)]
pub enum Error {
    /// Data validation failed before or after a database operation.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Converting between a Rust value and a column value failed.
    #[error("Type conversion error: {0}")]
    Conversion(String),

    /// Wrapped sqlx error that is not a recognised constraint violation.
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    /// A statement was rejected by an integrity constraint.
    ///
    /// `detail` carries the driver message verbatim, so callers that inspect
    /// message text (column names, constraint names) keep working.
    #[error("{kind} constraint violation: {detail}")]
    ConstraintViolation { kind: ConstraintKind, detail: String },

    /// A declared field could not be resolved against a result row.
    #[error("Mapping error on field '{field}': {message}")]
    Mapping { field: String, message: String },

    /// A method received an argument it cannot work with.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An insert, update or exec filter rejected the command.
    #[error("Filter aborted command: {0}")]
    Filter(String),

    /// The command did not finish within its timeout.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// The active dialect cannot express the requested operation.
    #[error("Unsupported by dialect: {0}")]
    Unsupported(String),
}

// ============================================================================
// Error Conversion Implementations
// ============================================================================

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::from_sqlx(err)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

impl Error {
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Error::InvalidData(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Error::Conversion(msg.into())
    }

    pub fn filter(msg: impl Into<String>) -> Self {
        Error::Filter(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Creates a `Mapping` error for the given field.
    pub fn mapping(field: &str, message: impl Into<String>) -> Self {
        Error::Mapping { field: field.to_string(), message: message.into() }
    }

    /// Converts a driver error, classifying constraint violations.
    ///
    /// The structured `ErrorKind` reported by sqlx is consulted first, then the
    /// message text is matched against the wording SQLite, PostgreSQL, MySQL
    /// and SQL Server use.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let classified = match &err {
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                let kind = match db.kind() {
                    ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
                    ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
                    ErrorKind::NotNullViolation => Some(ConstraintKind::NotNull),
                    ErrorKind::CheckViolation => Some(ConstraintKind::Check),
                    _ => classify_constraint_message(&message),
                };
                kind.map(|kind| (kind, message))
            }
            _ => None,
        };

        match classified {
            Some((kind, detail)) => Error::ConstraintViolation { kind, detail },
            None => Error::DatabaseError(err),
        }
    }

    /// Returns true when this error is a classified constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation { .. })
    }

    /// Returns the violated constraint kind, if any.
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            Error::ConstraintViolation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True for "object already exists" failures, which index creation ignores.
    pub(crate) fn is_already_exists(&self) -> bool {
        let text = self.to_string().to_lowercase();
        text.contains("already exists") || text.contains("already an object named")
    }
}

/// Best-effort classification of a driver message into a constraint kind.
///
/// Returns `None` when the message does not look like a constraint failure.
pub fn classify_constraint_message(message: &str) -> Option<ConstraintKind> {
    let lower = message.to_lowercase();

    if lower.contains("unique constraint")
        || lower.contains("duplicate entry")
        || lower.contains("duplicate key")
        || lower.contains("violation of unique key")
        || lower.contains("violation of primary key")
    {
        return Some(ConstraintKind::Unique);
    }
    if lower.contains("foreign key constraint") || lower.contains("foreign key") {
        return Some(ConstraintKind::ForeignKey);
    }
    if lower.contains("not null constraint")
        || lower.contains("cannot be null")
        || lower.contains("cannot insert the value null")
        || lower.contains("null value in column")
    {
        return Some(ConstraintKind::NotNull);
    }
    if lower.contains("check constraint") {
        return Some(ConstraintKind::Check);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sqlite_messages() {
        assert_eq!(
            classify_constraint_message("UNIQUE constraint failed: Person.Name"),
            Some(ConstraintKind::Unique)
        );
        assert_eq!(
            classify_constraint_message("CHECK constraint failed: CHK_Person_age"),
            Some(ConstraintKind::Check)
        );
        assert_eq!(
            classify_constraint_message("NOT NULL constraint failed: Person.name"),
            Some(ConstraintKind::NotNull)
        );
        assert_eq!(classify_constraint_message("FOREIGN KEY constraint failed"), Some(ConstraintKind::ForeignKey));
    }

    #[test]
    fn classifies_other_provider_messages() {
        assert_eq!(
            classify_constraint_message("Duplicate entry 'foo' for key 'uidx_person_name'"),
            Some(ConstraintKind::Unique)
        );
        assert_eq!(
            classify_constraint_message("null value in column \"name\" violates not-null constraint"),
            Some(ConstraintKind::NotNull)
        );
        assert_eq!(classify_constraint_message("syntax error near FROM"), None);
    }

    #[test]
    fn display_keeps_driver_detail() {
        let err = Error::ConstraintViolation {
            kind: ConstraintKind::Check,
            detail: "CHECK constraint failed: age > 1".to_string(),
        };
        let text = err.to_string().to_lowercase();
        assert!(text.contains("age"));
        assert!(text.contains("constraint"));
        assert_eq!(err.constraint_kind(), Some(ConstraintKind::Check));
    }
}
