//! Queries over the `files` table.
//!
//! JSON-valued fields are serialized here, at the storage boundary, and
//! parsed back when rows are read.

use std::collections::BTreeMap;

use jiff::Timestamp;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::transaction::BatchStatement;
use crate::error::{DatabaseResultExt, Result, StoreError};
use crate::models::{DocumentUpdate, FileDocumentation, SearchResult};

/// Stored document fields, in the order rows are written and read.
pub(crate) const DOCUMENT_COLUMNS: [&str; 15] = [
    "filepath",
    "filename",
    "overview",
    "ddd_context",
    "functions",
    "exports",
    "imports",
    "types_interfaces_classes",
    "constants",
    "dependencies",
    "other_notes",
    "full_content",
    "documented_at_commit",
    "documented_at",
    "content_hash",
];

const FULL_CONTENT_INDEX: usize = 11;

const UPSERT_HEAD: &str = "INSERT INTO files (dataset_id, filepath, filename, overview, ddd_context, functions, exports, imports, types_interfaces_classes, constants, dependencies, other_notes, full_content, documented_at_commit, documented_at, content_hash) VALUES";

const UPSERT_TAIL: &str = "ON CONFLICT(dataset_id, filepath) DO UPDATE SET
    filename = excluded.filename,
    overview = excluded.overview,
    ddd_context = excluded.ddd_context,
    functions = excluded.functions,
    exports = excluded.exports,
    imports = excluded.imports,
    types_interfaces_classes = excluded.types_interfaces_classes,
    constants = excluded.constants,
    dependencies = excluded.dependencies,
    other_notes = excluded.other_notes,
    full_content = excluded.full_content,
    documented_at_commit = excluded.documented_at_commit,
    documented_at = excluded.documented_at,
    content_hash = excluded.content_hash";

/// Multi-row upsert keyed by `(dataset_id, filepath)`.
pub(crate) const UPSERT_STATEMENT: BatchStatement<'static> = BatchStatement {
    head: UPSERT_HEAD,
    columns: DOCUMENT_COLUMNS.len() + 1,
    tail: UPSERT_TAIL,
};

const DELETE_DOCUMENT_SQL: &str = "DELETE FROM files WHERE dataset_id = ?1 AND filepath = ?2";
const DELETE_DATASET_DOCUMENTS_SQL: &str = "DELETE FROM files WHERE dataset_id = ?1";
const LIST_FILES_SQL: &str = "SELECT filepath FROM files WHERE dataset_id = ?1 ORDER BY filepath";
const CONTENT_HASHES_SQL: &str =
    "SELECT filepath, content_hash FROM files WHERE dataset_id = ?1 AND content_hash IS NOT NULL";
const GLOB_CANDIDATES_SQL: &str = "SELECT filepath, filename, dataset_id, overview, ddd_context FROM files WHERE dataset_id = ?1 AND filepath GLOB ?2 ORDER BY filepath LIMIT ?3";
const COPY_DATASET_SQL: &str = "INSERT INTO files (dataset_id, filepath, filename, overview, ddd_context, functions, exports, imports, types_interfaces_classes, constants, dependencies, other_notes, full_content, documented_at_commit, documented_at, content_hash)
    SELECT ?1, filepath, filename, overview, ddd_context, functions, exports, imports, types_interfaces_classes, constants, dependencies, other_notes, full_content, documented_at_commit, documented_at, content_hash
    FROM files WHERE dataset_id = ?2 ORDER BY id";

/// Builds the value row for [`UPSERT_STATEMENT`]. Fails on an empty path or
/// a field that cannot be serialized.
pub(crate) fn document_row(dataset: &str, doc: &FileDocumentation) -> Result<Vec<Value>> {
    validate_filepath(&doc.filepath)?;

    let filename = if doc.filename.trim().is_empty() {
        FileDocumentation::filename_of(&doc.filepath)
    } else {
        doc.filename.clone()
    };

    Ok(vec![
        Value::Text(dataset.to_string()),
        Value::Text(doc.filepath.clone()),
        Value::Text(filename),
        Value::Text(doc.overview.clone()),
        optional_text(&doc.ddd_context),
        json_value(&doc.functions)?,
        json_value(&doc.exports)?,
        json_value(&doc.imports)?,
        json_value(&doc.types_interfaces_classes)?,
        json_value(&doc.constants)?,
        json_value(&doc.dependencies)?,
        json_value(&doc.other_notes)?,
        optional_text(&doc.full_content),
        optional_text(&doc.documented_at_commit),
        Value::Text(doc.documented_at.to_string()),
        optional_text(&doc.content_hash),
    ])
}

pub(crate) fn validate_filepath(filepath: &str) -> Result<()> {
    if filepath.trim().is_empty() {
        return Err(StoreError::invalid_input("filepath").with_reason("must not be empty"));
    }
    if filepath.contains('\0') {
        return Err(StoreError::invalid_input("filepath").with_reason("must not contain NUL"));
    }
    Ok(())
}

fn optional_text(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::Text)
}

fn json_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(Value::Text(serde_json::to_string(value)?))
}

/// Inserts or replaces one document.
pub(crate) fn upsert(conn: &Connection, row: &[Value]) -> Result<()> {
    let mut stmt = conn
        .prepare_cached(&UPSERT_STATEMENT.sql_for(1))
        .db_context("Failed to prepare upsert")?;
    stmt.execute(params_from_iter(row))
        .db_context("Failed to write documentation")?;
    Ok(())
}

fn select_sql(include_content: bool) -> String {
    let columns = DOCUMENT_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, column)| {
            if i == FULL_CONTENT_INDEX && !include_content {
                "NULL".to_string()
            } else {
                column.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {columns} FROM files WHERE dataset_id = ?1 AND filepath = ?2")
}

/// Exact-path lookup.
pub(crate) fn get(
    conn: &Connection,
    dataset: &str,
    filepath: &str,
    include_content: bool,
) -> Result<Option<FileDocumentation>> {
    conn.query_row(&select_sql(include_content), params![dataset, filepath], map_document)
        .optional()
        .db_context("Failed to read documentation")
}

/// Files whose path matches a GLOB pattern, ordered by path.
/// Turns a caller path into a GLOB pattern where only `*` is special.
fn escape_glob(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '?' => escaped.push_str("[?]"),
            '[' => escaped.push_str("[[]"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub(crate) fn glob_candidates(
    conn: &Connection,
    dataset: &str,
    pattern: &str,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let mut stmt = conn
        .prepare(GLOB_CANDIDATES_SQL)
        .db_context("Failed to prepare path pattern query")?;
    let candidates = stmt
        .query_map(params![dataset, escape_glob(pattern), limit as i64], |row| {
            Ok(SearchResult {
                filepath: row.get(0)?,
                filename: row.get(1)?,
                dataset: row.get(2)?,
                score: 0.0,
                snippet: String::new(),
                overview: row.get(3)?,
                ddd_context: row.get(4)?,
            })
        })
        .db_context("Failed to match path pattern")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .db_context("Failed to read path pattern matches")?;
    Ok(candidates)
}

/// Applies `updates` to one document. Returns the number of rows changed
/// (0 when the document does not exist).
pub(crate) fn update(
    conn: &Connection,
    dataset: &str,
    filepath: &str,
    updates: &[DocumentUpdate],
) -> Result<usize> {
    if updates.is_empty() {
        return Ok(0);
    }

    let mut assignments = Vec::with_capacity(updates.len());
    let mut values = Vec::with_capacity(updates.len() + 2);
    for (i, update) in updates.iter().enumerate() {
        assignments.push(format!("{} = ?{}", update.column(), i + 1));
        values.push(update_value(update)?);
    }
    values.push(Value::Text(dataset.to_string()));
    values.push(Value::Text(filepath.to_string()));

    let sql = format!(
        "UPDATE files SET {} WHERE dataset_id = ?{} AND filepath = ?{}",
        assignments.join(", "),
        updates.len() + 1,
        updates.len() + 2
    );
    conn.execute(&sql, params_from_iter(values))
        .db_context("Failed to update documentation")
}

fn update_value(update: &DocumentUpdate) -> Result<Value> {
    match update {
        DocumentUpdate::Overview(v) => Ok(Value::Text(v.clone())),
        DocumentUpdate::DddContext(v)
        | DocumentUpdate::FullContent(v)
        | DocumentUpdate::DocumentedAtCommit(v)
        | DocumentUpdate::ContentHash(v) => Ok(optional_text(v)),
        DocumentUpdate::Functions(v)
        | DocumentUpdate::Exports(v)
        | DocumentUpdate::Imports(v)
        | DocumentUpdate::TypesInterfacesClasses(v)
        | DocumentUpdate::Constants(v) => json_value(v),
        DocumentUpdate::Dependencies(v) | DocumentUpdate::OtherNotes(v) => json_value(v),
    }
}

pub(crate) fn delete(conn: &Connection, dataset: &str, filepath: &str) -> Result<usize> {
    conn.execute(DELETE_DOCUMENT_SQL, params![dataset, filepath])
        .db_context("Failed to delete documentation")
}

pub(crate) fn delete_all(conn: &Connection, dataset: &str) -> Result<usize> {
    conn.execute(DELETE_DATASET_DOCUMENTS_SQL, [dataset])
        .db_context("Failed to delete dataset documentation")
}

/// Copies every document of `source` into `target`, returning the count.
pub(crate) fn copy_dataset(conn: &Connection, source: &str, target: &str) -> Result<usize> {
    conn.execute(COPY_DATASET_SQL, params![target, source])
        .db_context("Failed to copy dataset documentation")
}

pub(crate) fn list_files(conn: &Connection, dataset: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(LIST_FILES_SQL)
        .db_context("Failed to prepare file listing")?;
    let files = stmt
        .query_map([dataset], |row| row.get(0))
        .db_context("Failed to list files")?
        .collect::<rusqlite::Result<Vec<String>>>()
        .db_context("Failed to read file listing")?;
    Ok(files)
}

pub(crate) fn content_hashes(conn: &Connection, dataset: &str) -> Result<BTreeMap<String, String>> {
    let mut stmt = conn
        .prepare(CONTENT_HASHES_SQL)
        .db_context("Failed to prepare content hash query")?;
    let hashes = stmt
        .query_map([dataset], |row| Ok((row.get(0)?, row.get(1)?)))
        .db_context("Failed to read content hashes")?
        .collect::<rusqlite::Result<BTreeMap<String, String>>>()
        .db_context("Failed to read content hashes")?;
    Ok(hashes)
}

/// Maps a row selected in [`DOCUMENT_COLUMNS`] order.
fn map_document(row: &Row<'_>) -> rusqlite::Result<FileDocumentation> {
    Ok(FileDocumentation {
        filepath: row.get(0)?,
        filename: row.get(1)?,
        overview: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        ddd_context: row.get(3)?,
        functions: json_column(row, 4)?,
        exports: json_column(row, 5)?,
        imports: json_column(row, 6)?,
        types_interfaces_classes: json_column(row, 7)?,
        constants: json_column(row, 8)?,
        dependencies: json_column(row, 9)?,
        other_notes: json_column(row, 10)?,
        full_content: row.get(11)?,
        documented_at_commit: row.get(12)?,
        documented_at: row
            .get::<_, String>(13)?
            .parse::<Timestamp>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e)))?,
        content_hash: row.get(14)?,
    })
}

/// Parses a JSON text column; NULL or empty text yields the default value.
fn json_column<T: DeserializeOwned + Default>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) if !text.trim().is_empty() => serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        _ => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_glob_keeps_only_star() {
        assert_eq!(escape_glob("app/[id]/page.tsx*"), "app/[[]id]/page.tsx*");
        assert_eq!(escape_glob("what?.rs"), "what[?].rs");
        assert_eq!(escape_glob("src/*.rs"), "src/*.rs");
    }

    #[test]
    fn test_document_row_shape() {
        let doc = FileDocumentation::new("src/app.py", "entry point")
            .with_function("main", json!({"signature": "main()"}));

        let row = document_row("docs-main", &doc).expect("row");

        assert_eq!(row.len(), UPSERT_STATEMENT.columns);
        assert_eq!(row[0], Value::Text("docs-main".into()));
        assert_eq!(row[2], Value::Text("app.py".into()));
        assert_eq!(
            row[5],
            Value::Text(r#"{"main":{"signature":"main()"}}"#.into())
        );
        assert_eq!(row[10], Value::Text("[]".into()));
        assert_eq!(row[12], Value::Null);
    }

    #[test]
    fn test_blank_filename_is_derived() {
        let mut doc = FileDocumentation::new("lib/util.rs", "helpers");
        doc.filename = String::new();

        let row = document_row("ds", &doc).expect("row");

        assert_eq!(row[2], Value::Text("util.rs".into()));
    }

    #[test]
    fn test_empty_filepath_rejected() {
        let doc = FileDocumentation::new("  ", "nothing");
        let err = document_row("ds", &doc).expect_err("empty path must fail");
        assert!(matches!(err, StoreError::InvalidInput { ref field, .. } if field == "filepath"));
    }

    #[test]
    fn test_select_without_content() {
        let sql = select_sql(false);
        assert!(!sql.contains("full_content"));
        assert!(select_sql(true).contains("full_content"));
    }
}
