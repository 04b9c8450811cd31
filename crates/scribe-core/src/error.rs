//! Error types for the documentation store.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Every failure the store can report.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A statement failed; `message` says which one
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: rusqlite::Error,
    },
    /// No pooled connection became available within the wait budget
    #[error("Timed out after {waited:?} waiting for a database connection")]
    PoolTimeout { waited: Duration },
    /// The pool has been closed and no longer hands out connections
    #[error("Connection pool is closed")]
    PoolClosed,
    /// Any other connection pool failure
    #[error("Connection pool error: {message}")]
    Pool { message: String },
    /// A statement ran past its deadline and was interrupted
    #[error("Query exceeded its {timeout:?} timeout and was interrupted")]
    QueryTimeout { timeout: Duration },
    /// Caller-supplied value failed validation
    #[error("Invalid input for field '{field}': {reason}")]
    InvalidInput { field: String, reason: String },
    /// Schema or index migration failures; startup must not continue
    #[error("Migration to schema version {version} failed: {message}")]
    Migration { version: i64, message: String },
    /// JSON encoding or decoding of a stored field
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    /// Creating the database directory or reading file metadata
    #[error("File system error at path '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },
    /// No XDG data directory could be resolved
    #[error("XDG directory error: {0}")]
    XdgDirectory(String),
    /// Rejected [`StoreConfig`](crate::config::StoreConfig) values
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Pairs a context message with the rusqlite error that caused it.
pub struct DatabaseErrorBuilder {
    message: String,
}

impl DatabaseErrorBuilder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Attaches the underlying rusqlite error.
    pub fn with_source(self, source: rusqlite::Error) -> StoreError {
        StoreError::Database {
            message: self.message,
            source,
        }
    }
}

/// Names the offending field of a rejected input.
pub struct InvalidInputBuilder {
    field: String,
}

impl InvalidInputBuilder {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn with_reason(self, reason: impl Into<String>) -> StoreError {
        StoreError::InvalidInput {
            field: self.field,
            reason: reason.into(),
        }
    }
}

impl StoreError {
    /// Starts a [`StoreError::Database`] with a context message.
    pub fn database(message: impl Into<String>) -> DatabaseErrorBuilder {
        DatabaseErrorBuilder::new(message)
    }

    /// Starts a [`StoreError::InvalidInput`] for `field`.
    pub fn invalid_input(field: impl Into<String>) -> InvalidInputBuilder {
        InvalidInputBuilder::new(field)
    }

    /// Creates a migration error for the given target version.
    pub fn migration(version: i64, message: impl Into<String>) -> Self {
        Self::Migration {
            version,
            message: message.into(),
        }
    }

    /// Returns true when the underlying SQLite error is a constraint
    /// violation (unique key, foreign key, check).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Database { source, .. }
                if source.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
        )
    }

    /// Returns true for exhaustion errors that a caller may retry with backoff.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            StoreError::PoolTimeout { .. } | StoreError::QueryTimeout { .. }
        )
    }
}

/// Adds a context message to raw rusqlite results.
pub trait DatabaseResultExt<T> {
    fn db_context(self, message: &str) -> Result<T>;
}

impl<T> DatabaseResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn db_context(self, message: &str) -> Result<T> {
        self.map_err(|e| StoreError::database(message).with_source(e))
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_violation_detection() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .expect("setup");

        let err = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .db_context("insert duplicate")
            .expect_err("duplicate key must fail");

        assert!(err.is_constraint_violation());
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("insert duplicate"));
    }

    #[test]
    fn test_timeout_classification() {
        let err = StoreError::PoolTimeout {
            waited: Duration::from_secs(1),
        };
        assert!(err.is_timeout());
        assert!(!err.is_constraint_violation());

        let err = StoreError::invalid_input("dataset_id").with_reason("empty");
        assert_eq!(
            err.to_string(),
            "Invalid input for field 'dataset_id': empty"
        );
    }
}
