//! Queries over `dataset_metadata`.

use std::collections::BTreeMap;

use jiff::Timestamp;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{DatabaseResultExt, Result, StoreError};
use crate::models::{DatasetMetadata, DatasetStats, DatasetType, DatasetUpdate, NewDataset};

const METADATA_COLUMNS: &str = "dataset_id, source_dir, files_count, loaded_at, updated_at, dataset_type, parent_dataset_id, source_branch";

const INSERT_DATASET_SQL: &str = "INSERT INTO dataset_metadata (dataset_id, source_dir, files_count, loaded_at, updated_at, dataset_type, parent_dataset_id, source_branch) VALUES (?1, ?2, 0, ?3, ?3, ?4, ?5, ?6)";
const DELETE_DATASET_SQL: &str = "DELETE FROM dataset_metadata WHERE dataset_id = ?1";
const CHILDREN_SQL: &str =
    "SELECT dataset_id FROM dataset_metadata WHERE parent_dataset_id = ?1 ORDER BY dataset_id";
const REFRESH_COUNT_SQL: &str = "UPDATE dataset_metadata SET files_count = (SELECT COUNT(*) FROM files WHERE dataset_id = ?1), updated_at = ?2 WHERE dataset_id = ?1";
const DOCUMENT_TOTALS_SQL: &str = "SELECT COUNT(*), COUNT(full_content), COALESCE(SUM(LENGTH(CAST(full_content AS BLOB))), 0), MAX(documented_at) FROM files WHERE dataset_id = ?1";
const CONTEXT_COUNTS_SQL: &str = "SELECT ddd_context, COUNT(*) FROM files WHERE dataset_id = ?1 AND ddd_context IS NOT NULL GROUP BY ddd_context";
const LAST_COMMIT_SQL: &str = "SELECT documented_at_commit FROM files WHERE dataset_id = ?1 AND documented_at_commit IS NOT NULL ORDER BY documented_at DESC, id DESC LIMIT 1";

pub(crate) fn insert(conn: &Connection, dataset: &NewDataset) -> Result<()> {
    conn.execute(
        INSERT_DATASET_SQL,
        params![
            dataset.dataset_id,
            dataset.source_dir,
            Timestamp::now().to_string(),
            dataset.dataset_type.as_str(),
            dataset.parent_dataset_id,
            dataset.source_branch,
        ],
    )
    .db_context("Failed to insert dataset")?;
    Ok(())
}

pub(crate) fn get(conn: &Connection, dataset_id: &str) -> Result<Option<DatasetMetadata>> {
    conn.query_row(
        &format!("SELECT {METADATA_COLUMNS} FROM dataset_metadata WHERE dataset_id = ?1"),
        [dataset_id],
        map_metadata,
    )
    .optional()
    .db_context("Failed to read dataset")
}

pub(crate) fn list(conn: &Connection) -> Result<Vec<DatasetMetadata>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {METADATA_COLUMNS} FROM dataset_metadata ORDER BY dataset_id"
        ))
        .db_context("Failed to prepare dataset listing")?;
    let datasets = stmt
        .query_map([], map_metadata)
        .db_context("Failed to list datasets")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .db_context("Failed to read datasets")?;
    Ok(datasets)
}

/// Applies the set fields of `update`. Returns the number of rows changed.
pub(crate) fn update(conn: &Connection, dataset_id: &str, update: &DatasetUpdate) -> Result<usize> {
    conn.execute(
        "UPDATE dataset_metadata
         SET source_dir = COALESCE(?2, source_dir),
             source_branch = COALESCE(?3, source_branch),
             dataset_type = COALESCE(?4, dataset_type),
             updated_at = ?5
         WHERE dataset_id = ?1",
        params![
            dataset_id,
            update.source_dir,
            update.source_branch,
            update.dataset_type.map(|t| t.as_str()),
            Timestamp::now().to_string(),
        ],
    )
    .db_context("Failed to update dataset")
}

pub(crate) fn delete(conn: &Connection, dataset_id: &str) -> Result<usize> {
    conn.execute(DELETE_DATASET_SQL, [dataset_id])
        .db_context("Failed to delete dataset")
}

pub(crate) fn children(conn: &Connection, dataset_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(CHILDREN_SQL)
        .db_context("Failed to prepare child dataset query")?;
    let children = stmt
        .query_map([dataset_id], |row| row.get(0))
        .db_context("Failed to list child datasets")?
        .collect::<rusqlite::Result<Vec<String>>>()
        .db_context("Failed to read child datasets")?;
    Ok(children)
}

/// Recomputes `files_count` from the `files` table. A dataset without a
/// metadata row is left alone.
pub(crate) fn refresh_files_count(conn: &Connection, dataset_id: &str) -> Result<()> {
    conn.execute(
        REFRESH_COUNT_SQL,
        params![dataset_id, Timestamp::now().to_string()],
    )
    .db_context("Failed to refresh dataset file count")?;
    Ok(())
}

/// Aggregates over the documents of one dataset. `None` when the dataset
/// has neither metadata nor documents.
pub(crate) fn stats(conn: &Connection, dataset_id: &str) -> Result<Option<DatasetStats>> {
    let (documents, with_content, content_bytes, last_documented_at): (
        i64,
        i64,
        i64,
        Option<String>,
    ) = conn
        .query_row(DOCUMENT_TOTALS_SQL, [dataset_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .db_context("Failed to compute dataset totals")?;

    if documents == 0 && get(conn, dataset_id)?.is_none() {
        return Ok(None);
    }

    let mut stmt = conn
        .prepare(CONTEXT_COUNTS_SQL)
        .db_context("Failed to prepare context breakdown")?;
    let ddd_contexts = stmt
        .query_map([dataset_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })
        .db_context("Failed to compute context breakdown")?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()
        .db_context("Failed to read context breakdown")?;

    let last_commit = conn
        .query_row(LAST_COMMIT_SQL, [dataset_id], |row| row.get(0))
        .optional()
        .db_context("Failed to read last documented commit")?;

    let last_documented_at = last_documented_at
        .map(|text| text.parse::<Timestamp>())
        .transpose()
        .map_err(|e| {
            StoreError::database("Invalid documented_at timestamp").with_source(
                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)),
            )
        })?;

    Ok(Some(DatasetStats {
        dataset_id: dataset_id.to_string(),
        documents: documents as u64,
        documents_with_content: with_content as u64,
        total_content_bytes: content_bytes as u64,
        ddd_contexts,
        last_documented_at,
        last_commit,
    }))
}

fn map_metadata(row: &Row<'_>) -> rusqlite::Result<DatasetMetadata> {
    let dataset_type = match row.get::<_, Option<String>>(5)? {
        Some(text) => text.parse::<DatasetType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?,
        None => DatasetType::default(),
    };

    Ok(DatasetMetadata {
        dataset_id: row.get(0)?,
        source_dir: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        files_count: row.get::<_, i64>(2)? as u64,
        loaded_at: timestamp_column(row, 3)?,
        updated_at: timestamp_column(row, 4)?,
        dataset_type,
        parent_dataset_id: row.get(6)?,
        source_branch: row.get(7)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    row.get::<_, String>(idx)?
        .parse::<Timestamp>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
