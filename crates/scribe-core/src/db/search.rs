//! Ranked full-text scans over `files_fts`.

use rusqlite::{params, Connection};

use super::fts::{SearchScope, FTS_TABLE};
use crate::error::{Result, StoreError};
use crate::models::SearchResult;

const SNIPPET_TOKENS: i64 = 32;

fn search_sql(scope: SearchScope) -> String {
    format!(
        "SELECT f.filepath, f.filename, f.dataset_id, -bm25({FTS_TABLE}) AS score,
                snippet({FTS_TABLE}, {column}, '<mark>', '</mark>', '…', {SNIPPET_TOKENS}),
                f.overview, f.ddd_context
         FROM {FTS_TABLE}
         JOIN files f ON f.id = {FTS_TABLE}.rowid
         WHERE {FTS_TABLE} MATCH ?1
           AND (?2 IS NULL OR f.dataset_id = ?2)
         ORDER BY bm25({FTS_TABLE})
         LIMIT ?3",
        column = scope.snippet_column(),
    )
}

/// Runs a prepared match expression against one scope of the index, best
/// match first.
pub(crate) fn search(
    conn: &Connection,
    scope: SearchScope,
    match_expression: &str,
    dataset: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let query = scope.restrict(match_expression);
    let sql = search_sql(scope);

    let mut stmt = conn
        .prepare_cached(&sql)
        .map_err(|e| StoreError::database("Failed to prepare search").with_source(e))?;
    let results = stmt
        .query_map(params![query, dataset, limit as i64], |row| {
            Ok(SearchResult {
                filepath: row.get(0)?,
                filename: row.get(1)?,
                dataset: row.get(2)?,
                score: row.get(3)?,
                snippet: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                overview: row.get(5)?,
                ddd_context: row.get(6)?,
            })
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| search_error(match_expression, e))?;
    Ok(results)
}

/// FTS5 rejects malformed expressions at run time; report those as bad
/// input rather than storage failures.
fn search_error(match_expression: &str, error: rusqlite::Error) -> StoreError {
    let message = error.to_string();
    if message.contains("fts5: syntax error") || message.contains("no such column") {
        StoreError::invalid_input("query")
            .with_reason(format!("invalid search expression `{match_expression}`: {message}"))
    } else {
        StoreError::database("Search failed").with_source(error)
    }
}
