//! [`StorageBackend`] implementation for [`SqliteStorage`].

use std::collections::BTreeMap;

use log::{debug, info, warn};

use super::fts::{self, SearchScope};
use super::transaction::{transaction, transaction_with_mode, BatchWriter, BeginMode};
use super::{datasets, documents, migrations, search, SqliteStorage, BACKEND_NAME};
use crate::backend::StorageBackend;
use crate::error::{DatabaseResultExt, Result, StoreError};
use crate::models::{
    validate_dataset_id, BatchOperationResult, DatasetMetadata, DatasetStats, DatasetType,
    DatasetUpdate, DocumentUpdate, FileDocumentation, FileLookup, NewDataset, OperationResult,
    SearchResult, StorageInfo, UnifiedSearchResults,
};

/// Marker that turns a file lookup into a pattern lookup.
const WILDCARD: char = '*';

/// Upper bound on candidates returned for an ambiguous pattern.
const MAX_PATTERN_CANDIDATES: usize = 50;

/// Folds validation and integrity failures into a failed
/// [`OperationResult`]; everything else stays an error.
fn into_operation_result(outcome: Result<OperationResult>) -> Result<OperationResult> {
    match outcome {
        Ok(result) => Ok(result),
        Err(StoreError::InvalidInput { field, reason }) => Ok(OperationResult::failure(format!(
            "Invalid {field}: {reason}"
        ))),
        Err(e) if e.is_constraint_violation() => Ok(OperationResult::failure(e.to_string())),
        Err(e) => Err(e),
    }
}

impl SqliteStorage {
    fn run_search(
        &self,
        scope: SearchScope,
        query: &str,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        if let Some(dataset) = dataset {
            validate_dataset_id(dataset)?;
        }
        let Some(expression) = fts::build_match_query(query) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.acquire()?;
        conn.with_timeout(self.config.query_timeout(), |c| {
            search::search(c, scope, &expression, dataset, limit)
        })
    }

    fn insert_one(&self, doc: &FileDocumentation, dataset: &str) -> Result<OperationResult> {
        validate_dataset_id(dataset)?;
        let row = documents::document_row(dataset, doc)?;

        let conn = self.pool.acquire()?;
        transaction_with_mode(&conn, "insert_documentation", BeginMode::Immediate, |tx| {
            documents::upsert(tx, &row)?;
            datasets::refresh_files_count(tx, dataset)
        })?;

        Ok(OperationResult::ok(format!(
            "Documented {} in dataset '{dataset}'",
            doc.filepath
        )))
    }

    fn update_one(
        &self,
        filepath: &str,
        dataset: &str,
        updates: &[DocumentUpdate],
    ) -> Result<OperationResult> {
        validate_dataset_id(dataset)?;
        documents::validate_filepath(filepath)?;
        if updates.is_empty() {
            return Ok(OperationResult::failure("No fields to update"));
        }

        let conn = self.pool.acquire()?;
        let changed =
            transaction_with_mode(&conn, "update_documentation", BeginMode::Immediate, |tx| {
                let changed = documents::update(tx, dataset, filepath, updates)?;
                if changed > 0 {
                    datasets::refresh_files_count(tx, dataset)?;
                }
                Ok(changed)
            })?;

        Ok(if changed == 0 {
            OperationResult::failure(format!(
                "No documentation for {filepath} in dataset '{dataset}'"
            ))
        } else {
            OperationResult::ok(format!(
                "Updated {} field(s) of {filepath}",
                updates.len()
            ))
        })
    }

    fn delete_one(&self, filepath: &str, dataset: &str) -> Result<OperationResult> {
        validate_dataset_id(dataset)?;
        documents::validate_filepath(filepath)?;

        let conn = self.pool.acquire()?;
        let removed =
            transaction_with_mode(&conn, "delete_documentation", BeginMode::Immediate, |tx| {
                let removed = documents::delete(tx, dataset, filepath)?;
                datasets::refresh_files_count(tx, dataset)?;
                Ok(removed)
            })?;

        Ok(if removed == 0 {
            OperationResult::failure(format!(
                "No documentation for {filepath} in dataset '{dataset}'"
            ))
        } else {
            OperationResult::ok(format!("Deleted {filepath} from dataset '{dataset}'"))
        })
    }

    fn register_dataset(&self, dataset: &NewDataset) -> Result<OperationResult> {
        dataset.validate()?;

        let conn = self.pool.acquire()?;
        transaction_with_mode(&conn, "create_dataset", BeginMode::Immediate, |tx| {
            if datasets::get(tx, &dataset.dataset_id)?.is_some() {
                return Ok(OperationResult::failure(format!(
                    "Dataset '{}' already exists",
                    dataset.dataset_id
                )));
            }
            if let Some(parent) = &dataset.parent_dataset_id {
                if datasets::get(tx, parent)?.is_none() {
                    return Ok(OperationResult::failure(format!(
                        "Parent dataset '{parent}' does not exist"
                    )));
                }
            }

            datasets::insert(tx, dataset)?;
            // Documents may have been written before the dataset was registered.
            datasets::refresh_files_count(tx, &dataset.dataset_id)?;
            Ok(OperationResult::ok(format!(
                "Created {} dataset '{}'",
                dataset.dataset_type, dataset.dataset_id
            )))
        })
    }

    fn apply_dataset_update(
        &self,
        dataset_id: &str,
        update: &DatasetUpdate,
    ) -> Result<OperationResult> {
        validate_dataset_id(dataset_id)?;
        if update.is_empty() {
            return Ok(OperationResult::failure("No fields to update"));
        }

        let conn = self.pool.acquire()?;
        transaction_with_mode(&conn, "update_dataset", BeginMode::Immediate, |tx| {
            let Some(existing) = datasets::get(tx, dataset_id)? else {
                return Ok(OperationResult::failure(format!(
                    "Dataset '{dataset_id}' does not exist"
                )));
            };
            let new_type = update.dataset_type.unwrap_or(existing.dataset_type);
            if new_type.requires_parent() && existing.parent_dataset_id.is_none() {
                return Ok(OperationResult::failure(format!(
                    "Dataset '{dataset_id}' has no parent and cannot become a {new_type}"
                )));
            }

            datasets::update(tx, dataset_id, update)?;
            Ok(OperationResult::ok(format!("Updated dataset '{dataset_id}'")))
        })
    }

    fn remove_dataset(&self, dataset_id: &str, force: bool) -> Result<OperationResult> {
        validate_dataset_id(dataset_id)?;

        let conn = self.pool.acquire()?;
        transaction_with_mode(&conn, "delete_dataset", BeginMode::Immediate, |tx| {
            let registered = datasets::get(tx, dataset_id)?.is_some();
            let children = datasets::children(tx, dataset_id)?;
            if !children.is_empty() && !force {
                return Ok(OperationResult::failure(format!(
                    "Dataset '{dataset_id}' has child datasets ({}); use force to delete it anyway",
                    children.join(", ")
                )));
            }

            let removed = documents::delete_all(tx, dataset_id)?;
            if !registered && removed == 0 {
                return Ok(OperationResult::failure(format!(
                    "Dataset '{dataset_id}' does not exist"
                )));
            }
            datasets::delete(tx, dataset_id)?;

            if !children.is_empty() {
                warn!(
                    "deleted dataset '{dataset_id}'; {} child dataset(s) no longer have a parent",
                    children.len()
                );
            }
            Ok(OperationResult::ok(format!(
                "Deleted dataset '{dataset_id}' and {removed} document(s)"
            )))
        })
    }

    fn fork(
        &self,
        source_id: &str,
        fork_id: &str,
        source_branch: Option<&str>,
    ) -> Result<OperationResult> {
        validate_dataset_id(source_id)?;

        let conn = self.pool.acquire()?;
        transaction_with_mode(&conn, "fork_dataset", BeginMode::Immediate, |tx| {
            let Some(source) = datasets::get(tx, source_id)? else {
                return Ok(OperationResult::failure(format!(
                    "Source dataset '{source_id}' does not exist"
                )));
            };
            if datasets::get(tx, fork_id)?.is_some() {
                return Ok(OperationResult::failure(format!(
                    "Dataset '{fork_id}' already exists"
                )));
            }

            let mut fork =
                NewDataset::derived(fork_id, source.source_dir, DatasetType::Fork, source_id);
            fork.source_branch = source_branch
                .map(str::to_string)
                .or(source.source_branch);
            fork.validate()?;

            datasets::insert(tx, &fork)?;
            let copied = documents::copy_dataset(tx, source_id, fork_id)?;
            datasets::refresh_files_count(tx, fork_id)?;

            info!("forked dataset '{source_id}' into '{fork_id}' ({copied} documents)");
            Ok(OperationResult::ok(format!(
                "Forked '{source_id}' into '{fork_id}' with {copied} document(s)"
            )))
        })
    }
}

impl StorageBackend for SqliteStorage {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn search_metadata(
        &self,
        query: &str,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.run_search(SearchScope::Metadata, query, dataset, limit)
    }

    fn search_content(
        &self,
        query: &str,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.run_search(SearchScope::Content, query, dataset, limit)
    }

    /// Runs both scans in one read transaction so they see the same
    /// snapshot of the index.
    fn search_unified(
        &self,
        query: &str,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<UnifiedSearchResults> {
        if let Some(dataset) = dataset {
            validate_dataset_id(dataset)?;
        }
        let Some(expression) = fts::build_match_query(query) else {
            return Ok(UnifiedSearchResults::default());
        };
        if limit == 0 {
            return Ok(UnifiedSearchResults::default());
        }

        let mut conn = self.pool.acquire()?;
        conn.with_timeout(self.config.query_timeout(), |c| {
            transaction(c, "search_unified", |tx| {
                let metadata = search::search(tx, SearchScope::Metadata, &expression, dataset, limit)?;
                let content = search::search(tx, SearchScope::Content, &expression, dataset, limit)?;
                Ok(UnifiedSearchResults::merge(metadata, content))
            })
        })
    }

    fn get_file_documentation(
        &self,
        filepath: &str,
        dataset: &str,
        include_content: bool,
    ) -> Result<FileLookup> {
        validate_dataset_id(dataset)?;
        documents::validate_filepath(filepath)?;

        let conn = self.pool.acquire()?;
        if let Some(doc) = documents::get(&conn, dataset, filepath, include_content)? {
            return Ok(FileLookup::Found(Box::new(doc)));
        }
        if !filepath.contains(WILDCARD) {
            return Ok(FileLookup::NotFound);
        }

        let mut candidates =
            documents::glob_candidates(&conn, dataset, filepath, MAX_PATTERN_CANDIDATES)?;
        match candidates.len() {
            0 => Ok(FileLookup::NotFound),
            1 => {
                let only = candidates.remove(0);
                debug!("pattern '{filepath}' resolved to {}", only.filepath);
                Ok(documents::get(&conn, dataset, &only.filepath, include_content)?
                    .map_or(FileLookup::NotFound, |doc| FileLookup::Found(Box::new(doc))))
            }
            _ => Ok(FileLookup::Ambiguous(candidates)),
        }
    }

    fn insert_documentation(
        &self,
        doc: &FileDocumentation,
        dataset: &str,
    ) -> Result<OperationResult> {
        into_operation_result(self.insert_one(doc, dataset))
    }

    fn insert_documentation_batch(
        &self,
        docs: &[FileDocumentation],
        dataset: &str,
    ) -> Result<BatchOperationResult> {
        let mut result = BatchOperationResult::new(docs.len());
        if let Err(e) = validate_dataset_id(dataset) {
            for doc in docs {
                result.record_failure(doc.filepath.clone(), e.to_string());
            }
            return Ok(result);
        }

        let mut rows = Vec::with_capacity(docs.len());
        let mut written_paths = Vec::with_capacity(docs.len());
        for doc in docs {
            match documents::document_row(dataset, doc) {
                Ok(row) => {
                    rows.push(row);
                    written_paths.push(doc.filepath.as_str());
                }
                Err(e) => result.record_failure(doc.filepath.clone(), e.to_string()),
            }
        }
        if rows.is_empty() {
            return Ok(result);
        }

        let conn = self.pool.acquire()?;
        let written =
            transaction_with_mode(&conn, "insert_documentation_batch", BeginMode::Immediate, |tx| {
                BatchWriter::new(self.config.batch_chunk_size)
                    .on_progress(|done, total| debug!("dataset '{dataset}': wrote {done}/{total} rows"))
                    .write(tx, &documents::UPSERT_STATEMENT, &rows)?;
                datasets::refresh_files_count(tx, dataset)
            });

        match written {
            Ok(()) => {
                for _ in &written_paths {
                    result.record_success();
                }
                info!(
                    "wrote {} documents to dataset '{dataset}'",
                    written_paths.len()
                );
            }
            Err(e) => {
                warn!("batch write to dataset '{dataset}' rolled back: {e}");
                for filepath in written_paths {
                    result.record_failure(filepath, format!("batch rolled back: {e}"));
                }
            }
        }
        Ok(result)
    }

    fn update_documentation(
        &self,
        filepath: &str,
        dataset: &str,
        updates: &[DocumentUpdate],
    ) -> Result<OperationResult> {
        into_operation_result(self.update_one(filepath, dataset, updates))
    }

    fn delete_documentation(&self, filepath: &str, dataset: &str) -> Result<OperationResult> {
        into_operation_result(self.delete_one(filepath, dataset))
    }

    fn delete_documentation_batch(
        &self,
        filepaths: &[String],
        dataset: &str,
    ) -> Result<BatchOperationResult> {
        let mut result = BatchOperationResult::new(filepaths.len());
        if let Err(e) = validate_dataset_id(dataset) {
            for filepath in filepaths {
                result.record_failure(filepath.clone(), e.to_string());
            }
            return Ok(result);
        }

        let conn = self.pool.acquire()?;
        let outcomes =
            transaction_with_mode(&conn, "delete_documentation_batch", BeginMode::Immediate, |tx| {
                let mut outcomes = Vec::with_capacity(filepaths.len());
                for filepath in filepaths {
                    outcomes.push(documents::delete(tx, dataset, filepath)?);
                }
                datasets::refresh_files_count(tx, dataset)?;
                Ok(outcomes)
            });

        match outcomes {
            Ok(outcomes) => {
                for (filepath, removed) in filepaths.iter().zip(outcomes) {
                    if removed > 0 {
                        result.record_success();
                    } else {
                        result.record_failure(filepath.clone(), "not found");
                    }
                }
            }
            Err(e) => {
                warn!("batch delete in dataset '{dataset}' rolled back: {e}");
                for filepath in filepaths {
                    result.record_failure(filepath.clone(), format!("batch rolled back: {e}"));
                }
            }
        }
        Ok(result)
    }

    fn list_files(&self, dataset: &str) -> Result<Vec<String>> {
        validate_dataset_id(dataset)?;
        let conn = self.pool.acquire()?;
        documents::list_files(&conn, dataset)
    }

    fn get_content_hashes(&self, dataset: &str) -> Result<BTreeMap<String, String>> {
        validate_dataset_id(dataset)?;
        let conn = self.pool.acquire()?;
        documents::content_hashes(&conn, dataset)
    }

    fn create_dataset(&self, dataset: &NewDataset) -> Result<OperationResult> {
        into_operation_result(self.register_dataset(dataset))
    }

    fn get_dataset_metadata(&self, dataset_id: &str) -> Result<Option<DatasetMetadata>> {
        validate_dataset_id(dataset_id)?;
        let conn = self.pool.acquire()?;
        datasets::get(&conn, dataset_id)
    }

    fn list_datasets(&self) -> Result<Vec<DatasetMetadata>> {
        let conn = self.pool.acquire()?;
        datasets::list(&conn)
    }

    fn update_dataset_metadata(
        &self,
        dataset_id: &str,
        update: &DatasetUpdate,
    ) -> Result<OperationResult> {
        into_operation_result(self.apply_dataset_update(dataset_id, update))
    }

    fn delete_dataset(&self, dataset_id: &str, force: bool) -> Result<OperationResult> {
        into_operation_result(self.remove_dataset(dataset_id, force))
    }

    fn fork_dataset(
        &self,
        source_id: &str,
        fork_id: &str,
        source_branch: Option<&str>,
    ) -> Result<OperationResult> {
        into_operation_result(self.fork(source_id, fork_id, source_branch))
    }

    fn get_dataset_stats(&self, dataset_id: &str) -> Result<Option<DatasetStats>> {
        validate_dataset_id(dataset_id)?;
        let conn = self.pool.acquire()?;
        transaction(&conn, "dataset_stats", |tx| datasets::stats(tx, dataset_id))
    }

    fn get_schema_version(&self) -> Result<i64> {
        let conn = self.pool.acquire()?;
        migrations::schema_version(&conn)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.migrate().map(|_| ())
    }

    fn vacuum(&self) -> Result<()> {
        let conn = self.pool.acquire()?;
        conn.execute_batch(&fts::optimize_sql())
            .db_context("Failed to optimize full-text index")?;
        conn.execute_batch("VACUUM")
            .db_context("Failed to vacuum database")?;
        info!("vacuumed {}", self.path.display());
        Ok(())
    }

    fn get_storage_info(&self) -> Result<StorageInfo> {
        let conn = self.pool.acquire()?;
        let file_size_bytes = std::fs::metadata(&self.path)
            .map_err(|source| StoreError::FileSystem {
                path: self.path.clone(),
                source,
            })?
            .len();

        let count = |sql: &str| -> Result<u64> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .db_context("Failed to count rows")
        };
        let pragma_int = |name: &str| -> Result<i64> {
            conn.query_row(&format!("PRAGMA {name}"), [], |row| row.get(0))
                .db_context("Failed to read pragma")
        };

        Ok(StorageInfo {
            backend: BACKEND_NAME.to_string(),
            database_path: self.path.clone(),
            file_size_bytes,
            schema_version: migrations::schema_version(&conn)?,
            datasets: count("SELECT COUNT(*) FROM dataset_metadata")?,
            documents: count("SELECT COUNT(*) FROM files")?,
            fts_definition: migrations::fts_definition(&conn)?,
            page_size: pragma_int("page_size")?,
            page_count: pragma_int("page_count")?,
            journal_mode: conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .db_context("Failed to read journal mode")?,
            pool: self.pool.stats(),
        })
    }

    fn health_check(&self) -> Result<()> {
        let conn = self.pool.acquire()?;
        let version = migrations::schema_version(&conn)?;
        if version < migrations::CURRENT_SCHEMA_VERSION {
            return Err(StoreError::migration(
                version,
                format!(
                    "schema is at version {version}, expected {}",
                    migrations::CURRENT_SCHEMA_VERSION
                ),
            ));
        }
        Ok(())
    }
}
