//! Builder for creating and configuring DocStore instances.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task;

use super::DocStore;
use crate::{
    config::StoreConfig,
    db::SqliteStorage,
    error::{Result, StoreError},
};

/// Builder for creating and configuring [`DocStore`] instances.
#[derive(Debug, Clone, Default)]
pub struct DocStoreBuilder {
    database_path: Option<PathBuf>,
    config: StoreConfig,
}

impl DocStoreBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom database file path.
    ///
    /// If not specified, uses the XDG Base Directory specification:
    /// `$XDG_DATA_HOME/scribe/scribe.db` or `~/.local/share/scribe/scribe.db`
    pub fn with_database_path<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.database_path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    /// Replaces the storage engine settings.
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Opens the database and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Configuration` for invalid settings
    /// Returns `StoreError::XdgDirectory` if no default location exists
    /// Returns `StoreError::Migration` if the schema cannot be upgraded
    pub async fn build(self) -> Result<DocStore> {
        self.config.validate()?;
        let db_path = match self.database_path {
            Some(path) => path,
            None => Self::default_database_path()?,
        };

        let config = self.config;
        let storage = task::spawn_blocking(move || SqliteStorage::open_with_config(db_path, config))
            .await
            .map_err(|e| StoreError::Configuration {
                message: format!("Task join error: {e}"),
            })??;

        Ok(DocStore::from_backend(Arc::new(storage)))
    }

    /// Returns the default database path following XDG Base Directory
    /// specification.
    pub fn default_database_path() -> Result<PathBuf> {
        xdg::BaseDirectories::with_prefix("scribe")
            .place_data_file("scribe.db")
            .map_err(|e| StoreError::XdgDirectory(e.to_string()))
    }
}
