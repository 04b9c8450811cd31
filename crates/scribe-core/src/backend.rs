//! The storage backend contract.
//!
//! Everything above the storage layer talks to a [`StorageBackend`] trait
//! object, so an alternative engine (or a test double) can stand in for
//! [`crate::db::SqliteStorage`].
//!
//! Error conventions shared by every implementation:
//!
//! - Reads and searches with invalid arguments fail with
//!   [`StoreError::InvalidInput`](crate::error::StoreError::InvalidInput).
//!   Lookups of missing records are not errors.
//! - Writes with a yes/no outcome report validation and integrity problems
//!   through [`OperationResult`] and reserve `Err` for storage failures.
//! - Batch writes report per-item failures in [`BatchOperationResult`].
//! - Pool exhaustion and interrupted statements surface as timeout errors
//!   the caller may retry.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::{
    BatchOperationResult, DatasetMetadata, DatasetStats, DatasetUpdate, DocumentUpdate,
    FileDocumentation, FileLookup, NewDataset, OperationResult, SearchResult, StorageInfo,
    UnifiedSearchResults,
};

/// Operations a documentation store must provide.
pub trait StorageBackend: Send + Sync {
    /// Short engine name, e.g. `"sqlite"`.
    fn backend_name(&self) -> &'static str;

    // Search

    /// Ranked search over the descriptive fields (path, overview, symbols,
    /// notes). `dataset: None` searches every dataset.
    fn search_metadata(
        &self,
        query: &str,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Ranked search over stored file contents only.
    fn search_content(
        &self,
        query: &str,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Both searches, merged so each file is listed once. Metadata matches
    /// take precedence over content matches.
    fn search_unified(
        &self,
        query: &str,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<UnifiedSearchResults> {
        let metadata = self.search_metadata(query, dataset, limit)?;
        let content = self.search_content(query, dataset, limit)?;
        Ok(UnifiedSearchResults::merge(metadata, content))
    }

    // Documents

    /// Looks up one file. A path containing `*` is treated as a pattern:
    /// one match resolves to that file, several are reported as ambiguous.
    fn get_file_documentation(
        &self,
        filepath: &str,
        dataset: &str,
        include_content: bool,
    ) -> Result<FileLookup>;

    /// Inserts or replaces the documentation of one file.
    fn insert_documentation(
        &self,
        doc: &FileDocumentation,
        dataset: &str,
    ) -> Result<OperationResult>;

    /// Inserts or replaces many files in one atomic write.
    fn insert_documentation_batch(
        &self,
        docs: &[FileDocumentation],
        dataset: &str,
    ) -> Result<BatchOperationResult>;

    fn update_documentation(
        &self,
        filepath: &str,
        dataset: &str,
        updates: &[DocumentUpdate],
    ) -> Result<OperationResult>;

    fn delete_documentation(&self, filepath: &str, dataset: &str) -> Result<OperationResult>;

    fn delete_documentation_batch(
        &self,
        filepaths: &[String],
        dataset: &str,
    ) -> Result<BatchOperationResult>;

    /// Documented paths of a dataset, sorted.
    fn list_files(&self, dataset: &str) -> Result<Vec<String>>;

    /// `filepath -> content_hash` for every file that has a hash.
    fn get_content_hashes(&self, dataset: &str) -> Result<BTreeMap<String, String>>;

    // Datasets

    fn create_dataset(&self, dataset: &NewDataset) -> Result<OperationResult>;

    fn get_dataset_metadata(&self, dataset_id: &str) -> Result<Option<DatasetMetadata>>;

    fn list_datasets(&self) -> Result<Vec<DatasetMetadata>>;

    fn update_dataset_metadata(
        &self,
        dataset_id: &str,
        update: &DatasetUpdate,
    ) -> Result<OperationResult>;

    /// Deletes a dataset and its documents. Refused while child datasets
    /// exist unless `force` is set; children then lose their parent link
    /// but keep their own documents.
    fn delete_dataset(&self, dataset_id: &str, force: bool) -> Result<OperationResult>;

    /// Creates `fork_id` as a fork of `source_id` holding a copy of every
    /// source document.
    fn fork_dataset(
        &self,
        source_id: &str,
        fork_id: &str,
        source_branch: Option<&str>,
    ) -> Result<OperationResult>;

    fn get_dataset_stats(&self, dataset_id: &str) -> Result<Option<DatasetStats>>;

    // Maintenance

    fn get_schema_version(&self) -> Result<i64>;

    /// Re-runs schema migrations; a no-op on a current database.
    fn ensure_schema(&self) -> Result<()>;

    /// Compacts the database file and merges full-text index segments.
    fn vacuum(&self) -> Result<()>;

    fn get_storage_info(&self) -> Result<StorageInfo>;

    /// Verifies that a connection can be obtained and the schema is readable.
    fn health_check(&self) -> Result<()>;
}
