//! SQLite storage engine for generated documentation.
//!
//! This module owns everything that touches SQL: the connection pool,
//! nestable transactions, schema migrations, the FTS5 index and the query
//! functions over the `files` and `dataset_metadata` tables.
//! [`SqliteStorage`] ties them together and implements
//! [`StorageBackend`](crate::backend::StorageBackend).

use std::path::{Path, PathBuf};

use log::info;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};

mod datasets;
mod documents;
pub mod fts;
pub mod migrations;
mod pool;
mod search;
mod sqlite_backend;
pub mod transaction;

pub use migrations::{MigrationReport, CURRENT_SCHEMA_VERSION};
pub use pool::{ConnectionPool, PoolStats, ScopedConnection};
pub use transaction::{
    transaction, transaction_with_mode, BatchStatement, BatchWriter, BeginMode, TxScope,
};

/// Engine name reported in [`crate::models::StorageInfo`].
pub const BACKEND_NAME: &str = "sqlite";

/// Documentation store backed by one SQLite file.
pub struct SqliteStorage {
    pool: ConnectionPool,
    config: StoreConfig,
    path: PathBuf,
}

impl SqliteStorage {
    /// Opens (creating if needed) the database at `path` with default
    /// settings and migrates it to the current schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens the database at `path` with explicit settings.
    ///
    /// Returns only after migrations have finished, so no caller ever sees a
    /// partially migrated schema.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::FileSystem {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let pool = ConnectionPool::new(&path, &config)?;
        let storage = Self { pool, config, path };
        let report = storage.migrate()?;
        if !report.is_noop() {
            info!(
                "migrated {} (applied {:?})",
                storage.path.display(),
                report.applied
            );
        }
        Ok(storage)
    }

    /// Runs schema migrations on a pooled connection.
    pub fn migrate(&self) -> Result<MigrationReport> {
        let conn = self.pool.acquire()?;
        migrations::run(&conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Closes the connection pool. Later operations fail with
    /// [`StoreError::PoolClosed`].
    pub fn close(&self) {
        self.pool.close();
    }
}
