//! Async documentation store API.
//!
//! [`DocStore`] is the entry point for async callers. Every operation runs
//! the blocking storage call on tokio's blocking thread pool, so SQLite work
//! never stalls the async executor. Build one with [`DocStoreBuilder`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task;

use crate::{
    backend::StorageBackend,
    error::{Result, StoreError},
    models::{
        BatchOperationResult, DatasetMetadata, DatasetStats, DatasetUpdate, DocumentUpdate,
        FileDocumentation, FileLookup, NewDataset, OperationResult, SearchResult, StorageInfo,
        UnifiedSearchResults,
    },
};

mod builder;

pub use builder::DocStoreBuilder;

/// Async handle to a documentation store. Cheap to clone.
#[derive(Clone)]
pub struct DocStore {
    backend: Arc<dyn StorageBackend>,
}

impl DocStore {
    /// Wraps an existing backend, e.g. a test double.
    pub fn from_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// The backend behind this store, for synchronous callers.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StorageBackend) -> Result<T> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        task::spawn_blocking(move || op(backend.as_ref()))
            .await
            .map_err(|e| StoreError::Configuration {
                message: format!("Task join error: {e}"),
            })?
    }

    /// Ranked search over descriptive fields. `dataset: None` searches all
    /// datasets.
    pub async fn search_metadata(
        &self,
        query: &str,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let query = query.to_string();
        let dataset = dataset.map(String::from);
        self.run(move |b| b.search_metadata(&query, dataset.as_deref(), limit))
            .await
    }

    /// Ranked search over file contents.
    pub async fn search_content(
        &self,
        query: &str,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let query = query.to_string();
        let dataset = dataset.map(String::from);
        self.run(move |b| b.search_content(&query, dataset.as_deref(), limit))
            .await
    }

    /// Metadata and content search merged without duplicates.
    pub async fn search_unified(
        &self,
        query: &str,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<UnifiedSearchResults> {
        let query = query.to_string();
        let dataset = dataset.map(String::from);
        self.run(move |b| b.search_unified(&query, dataset.as_deref(), limit))
            .await
    }

    /// Looks up one file; `*` in the path makes it a pattern.
    pub async fn get_file_documentation(
        &self,
        filepath: &str,
        dataset: &str,
        include_content: bool,
    ) -> Result<FileLookup> {
        let filepath = filepath.to_string();
        let dataset = dataset.to_string();
        self.run(move |b| b.get_file_documentation(&filepath, &dataset, include_content))
            .await
    }

    pub async fn insert_documentation(
        &self,
        doc: FileDocumentation,
        dataset: &str,
    ) -> Result<OperationResult> {
        let dataset = dataset.to_string();
        self.run(move |b| b.insert_documentation(&doc, &dataset))
            .await
    }

    pub async fn insert_documentation_batch(
        &self,
        docs: Vec<FileDocumentation>,
        dataset: &str,
    ) -> Result<BatchOperationResult> {
        let dataset = dataset.to_string();
        self.run(move |b| b.insert_documentation_batch(&docs, &dataset))
            .await
    }

    pub async fn update_documentation(
        &self,
        filepath: &str,
        dataset: &str,
        updates: Vec<DocumentUpdate>,
    ) -> Result<OperationResult> {
        let filepath = filepath.to_string();
        let dataset = dataset.to_string();
        self.run(move |b| b.update_documentation(&filepath, &dataset, &updates))
            .await
    }

    pub async fn delete_documentation(
        &self,
        filepath: &str,
        dataset: &str,
    ) -> Result<OperationResult> {
        let filepath = filepath.to_string();
        let dataset = dataset.to_string();
        self.run(move |b| b.delete_documentation(&filepath, &dataset))
            .await
    }

    pub async fn delete_documentation_batch(
        &self,
        filepaths: Vec<String>,
        dataset: &str,
    ) -> Result<BatchOperationResult> {
        let dataset = dataset.to_string();
        self.run(move |b| b.delete_documentation_batch(&filepaths, &dataset))
            .await
    }

    pub async fn list_files(&self, dataset: &str) -> Result<Vec<String>> {
        let dataset = dataset.to_string();
        self.run(move |b| b.list_files(&dataset)).await
    }

    pub async fn get_content_hashes(&self, dataset: &str) -> Result<BTreeMap<String, String>> {
        let dataset = dataset.to_string();
        self.run(move |b| b.get_content_hashes(&dataset)).await
    }

    pub async fn create_dataset(&self, dataset: NewDataset) -> Result<OperationResult> {
        self.run(move |b| b.create_dataset(&dataset)).await
    }

    pub async fn get_dataset_metadata(&self, dataset_id: &str) -> Result<Option<DatasetMetadata>> {
        let dataset_id = dataset_id.to_string();
        self.run(move |b| b.get_dataset_metadata(&dataset_id))
            .await
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetMetadata>> {
        self.run(|b| b.list_datasets()).await
    }

    pub async fn update_dataset_metadata(
        &self,
        dataset_id: &str,
        update: DatasetUpdate,
    ) -> Result<OperationResult> {
        let dataset_id = dataset_id.to_string();
        self.run(move |b| b.update_dataset_metadata(&dataset_id, &update))
            .await
    }

    /// Deletes a dataset and its documents; see
    /// [`StorageBackend::delete_dataset`] for how children are handled.
    pub async fn delete_dataset(&self, dataset_id: &str, force: bool) -> Result<OperationResult> {
        let dataset_id = dataset_id.to_string();
        self.run(move |b| b.delete_dataset(&dataset_id, force))
            .await
    }

    pub async fn fork_dataset(
        &self,
        source_id: &str,
        fork_id: &str,
        source_branch: Option<&str>,
    ) -> Result<OperationResult> {
        let source_id = source_id.to_string();
        let fork_id = fork_id.to_string();
        let source_branch = source_branch.map(String::from);
        self.run(move |b| b.fork_dataset(&source_id, &fork_id, source_branch.as_deref()))
            .await
    }

    pub async fn get_dataset_stats(&self, dataset_id: &str) -> Result<Option<DatasetStats>> {
        let dataset_id = dataset_id.to_string();
        self.run(move |b| b.get_dataset_stats(&dataset_id))
            .await
    }

    pub async fn get_schema_version(&self) -> Result<i64> {
        self.run(|b| b.get_schema_version()).await
    }

    pub async fn vacuum(&self) -> Result<()> {
        self.run(|b| b.vacuum()).await
    }

    pub async fn get_storage_info(&self) -> Result<StorageInfo> {
        self.run(|b| b.get_storage_info()).await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.run(|b| b.health_check()).await
    }
}
