//! Schema versioning and migrations.
//!
//! [`run`] brings any database this crate has ever written up to
//! [`CURRENT_SCHEMA_VERSION`]. Before the numbered steps it repairs two
//! older layouts in place:
//!
//! - a `schema_version` table whose `version` column was stored as text
//!   (`"2"`, `"1.0.0"`), rebuilt with an integer key
//! - a `files` table without a `dataset_id` column, whose rows move into
//!   the `default` dataset
//!
//! Each numbered step runs in its own immediate transaction together with
//! the row recording it, so a crash never leaves a step half applied and
//! two processes opening the same file serialize on the write lock.

use jiff::Timestamp;
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};

use super::documents::DOCUMENT_COLUMNS;
use super::fts::{
    self, CURRENT_TOKENIZER, DROP_TRIGGERS_SQL, FTS_REBUILD_TABLE, FTS_TABLE,
};
use super::transaction::{transaction_with_mode, BeginMode, TxScope};
use crate::error::{DatabaseResultExt, Result, StoreError};
use crate::models::DEFAULT_DATASET_ID;

/// Highest version [`MIGRATIONS`] knows about.
pub const CURRENT_SCHEMA_VERSION: i64 = 4;

const VERSION_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    description TEXT,
    applied_at TEXT NOT NULL
)";

const DATASET_METADATA_SQL: &str = "CREATE TABLE IF NOT EXISTS dataset_metadata (
    dataset_id TEXT PRIMARY KEY,
    source_dir TEXT NOT NULL DEFAULT '',
    files_count INTEGER NOT NULL DEFAULT 0,
    loaded_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    dataset_type TEXT NOT NULL DEFAULT 'main',
    parent_dataset_id TEXT REFERENCES dataset_metadata(dataset_id) ON DELETE SET NULL,
    source_branch TEXT
)";

/// Columns later versions added to `dataset_metadata`, with the declaration
/// used when an older table lacks them.
const DATASET_METADATA_COLUMNS: [(&str, &str); 7] = [
    ("source_dir", "TEXT NOT NULL DEFAULT ''"),
    ("files_count", "INTEGER NOT NULL DEFAULT 0"),
    ("loaded_at", "TEXT"),
    ("updated_at", "TEXT"),
    ("dataset_type", "TEXT NOT NULL DEFAULT 'main'"),
    (
        "parent_dataset_id",
        "TEXT REFERENCES dataset_metadata(dataset_id) ON DELETE SET NULL",
    ),
    ("source_branch", "TEXT"),
];

/// Values substituted for missing or NULL columns when moving rows out of
/// the legacy `files` table. `?2` is bound to the migration time.
const LEGACY_FALLBACKS: [(&str, &str); 10] = [
    ("filename", "filepath"),
    ("overview", "''"),
    ("functions", "'{}'"),
    ("exports", "'{}'"),
    ("imports", "'{}'"),
    ("types_interfaces_classes", "'{}'"),
    ("constants", "'{}'"),
    ("dependencies", "'[]'"),
    ("other_notes", "'[]'"),
    ("documented_at", "?2"),
];

fn files_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id TEXT NOT NULL,
            filepath TEXT NOT NULL,
            filename TEXT NOT NULL,
            overview TEXT NOT NULL DEFAULT '',
            ddd_context TEXT,
            functions TEXT NOT NULL DEFAULT '{{}}',
            exports TEXT NOT NULL DEFAULT '{{}}',
            imports TEXT NOT NULL DEFAULT '{{}}',
            types_interfaces_classes TEXT NOT NULL DEFAULT '{{}}',
            constants TEXT NOT NULL DEFAULT '{{}}',
            dependencies TEXT NOT NULL DEFAULT '[]',
            other_notes TEXT NOT NULL DEFAULT '[]',
            full_content TEXT,
            documented_at_commit TEXT,
            documented_at TEXT NOT NULL,
            content_hash TEXT,
            UNIQUE (dataset_id, filepath)
        )"
    )
}

/// One numbered, idempotent schema change.
pub struct MigrationStep {
    pub version: i64,
    pub description: &'static str,
    apply: fn(&TxScope<'_>) -> Result<()>,
}

/// Every schema change, in application order.
pub static MIGRATIONS: [MigrationStep; 4] = [
    MigrationStep {
        version: 1,
        description: "document table and indexes",
        apply: create_files_table,
    },
    MigrationStep {
        version: 2,
        description: "full-text index and sync triggers",
        apply: create_fts_index,
    },
    MigrationStep {
        version: 3,
        description: "identifier-preserving tokenizer",
        apply: migrate_tokenizer,
    },
    MigrationStep {
        version: 4,
        description: "change tracking columns",
        apply: add_tracking_columns,
    },
];

/// What a call to [`run`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions applied by this call, in order
    pub applied: Vec<i64>,
    pub repaired_version_table: bool,
    /// Rows from a pre-dataset `files` table were moved into `default`
    pub migrated_legacy_files: bool,
    pub added_dataset_columns: Vec<&'static str>,
}

impl MigrationReport {
    /// True when the database was already current.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
            && !self.repaired_version_table
            && !self.migrated_legacy_files
            && self.added_dataset_columns.is_empty()
    }
}

/// Brings the schema up to date. Safe to call on every startup.
pub fn run(conn: &Connection) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    transaction_with_mode(conn, "schema_bootstrap", BeginMode::Immediate, |tx| {
        tx.execute_batch(VERSION_TABLE_SQL)
            .db_context("Failed to create schema_version table")?;
        report.repaired_version_table = repair_version_column(tx)?;
        report.migrated_legacy_files = migrate_legacy_files(tx)?;
        report.added_dataset_columns = ensure_dataset_metadata(tx)?;
        if report.migrated_legacy_files {
            register_default_dataset(tx)?;
        }
        Ok(())
    })
    .map_err(|e| as_migration_error(0, e))?;

    for step in &MIGRATIONS {
        let applied = transaction_with_mode(conn, step.description, BeginMode::Immediate, |tx| {
            if is_applied(tx, step.version)? {
                return Ok(false);
            }
            info!(
                "applying schema migration {}: {}",
                step.version, step.description
            );
            (step.apply)(tx)?;
            tx.execute(
                "INSERT INTO schema_version (version, description, applied_at) VALUES (?1, ?2, ?3)",
                params![step.version, step.description, Timestamp::now().to_string()],
            )
            .db_context("Failed to record schema version")?;
            Ok(true)
        })
        .map_err(|e| as_migration_error(step.version, e))?;

        if applied {
            report.applied.push(step.version);
        }
    }

    if report.is_noop() {
        debug!("schema is current at version {CURRENT_SCHEMA_VERSION}");
    }
    Ok(report)
}

/// Highest recorded schema version, 0 for an empty database.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .db_context("Failed to read schema version")
}

/// `CREATE VIRTUAL TABLE` text of the live full-text index, if it exists.
pub fn fts_definition(conn: &Connection) -> Result<Option<String>> {
    conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [FTS_TABLE],
        |row| row.get(0),
    )
    .optional()
    .db_context("Failed to read full-text index definition")
}

fn as_migration_error(version: i64, error: StoreError) -> StoreError {
    match error {
        StoreError::Migration { .. } => error,
        other => StoreError::migration(version, other.to_string()),
    }
}

fn is_applied(conn: &Connection, version: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM schema_version WHERE version = ?1)",
        [version],
        |row| row.get(0),
    )
    .db_context("Failed to check schema version")
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )
    .db_context("Failed to check table existence")
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare("SELECT name, type FROM pragma_table_info(?1)")
        .db_context("Failed to prepare table_info query")?;
    let columns = stmt
        .query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))
        .db_context("Failed to read table columns")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .db_context("Failed to read table columns")?;
    Ok(columns)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    Ok(table_columns(conn, table)?
        .iter()
        .any(|(name, _)| name == column))
}

/// Interprets a stored schema version: integers as-is, text such as `"2"`
/// or `"1.0.0"` by its leading number.
fn coerce_version(raw: &Value) -> Option<i64> {
    match raw {
        Value::Integer(v) => Some(*v),
        Value::Real(v) => Some(*v as i64),
        Value::Text(s) => s.trim().split('.').next()?.trim().parse().ok(),
        _ => None,
    }
}

fn repair_version_column(tx: &TxScope<'_>) -> Result<bool> {
    let columns = table_columns(tx, "schema_version")?;
    let Some((_, kind)) = columns.iter().find(|(name, _)| name == "version") else {
        return Ok(false);
    };
    if kind.eq_ignore_ascii_case("INTEGER") {
        return Ok(false);
    }

    warn!("schema_version.version is declared '{kind}', rebuilding it as INTEGER");
    let has = |column: &str| columns.iter().any(|(name, _)| name == column);
    let select = format!(
        "SELECT version, {}, {} FROM schema_version",
        if has("description") { "description" } else { "NULL" },
        if has("applied_at") { "applied_at" } else { "NULL" },
    );

    let rows: Vec<(Value, Option<String>, Option<String>)> = {
        let mut stmt = tx
            .prepare(&select)
            .db_context("Failed to read legacy schema versions")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .db_context("Failed to read legacy schema versions")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .db_context("Failed to read legacy schema versions")?;
        rows
    };

    tx.execute_batch(&VERSION_TABLE_SQL.replace("schema_version", "schema_version_repaired"))
        .db_context("Failed to create repaired schema_version table")?;

    let now = Timestamp::now().to_string();
    for (raw, description, applied_at) in rows {
        let Some(version) = coerce_version(&raw) else {
            warn!("dropping unreadable schema version {raw:?}");
            continue;
        };
        tx.execute(
            "INSERT OR IGNORE INTO schema_version_repaired (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![version, description, applied_at.unwrap_or_else(|| now.clone())],
        )
        .db_context("Failed to copy schema version")?;
    }

    tx.execute_batch(
        "DROP TABLE schema_version;
         ALTER TABLE schema_version_repaired RENAME TO schema_version;",
    )
    .db_context("Failed to replace schema_version table")?;
    Ok(true)
}

fn migrate_legacy_files(tx: &TxScope<'_>) -> Result<bool> {
    if !table_exists(tx, "files")? {
        return Ok(false);
    }
    let legacy: Vec<String> = table_columns(tx, "files")?
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    if legacy.iter().any(|name| name == "dataset_id") {
        return Ok(false);
    }
    if !legacy.iter().any(|name| name == "filepath") {
        return Err(StoreError::migration(
            0,
            "legacy files table has no filepath column",
        ));
    }

    info!("moving legacy documentation rows into dataset '{DEFAULT_DATASET_ID}'");

    let mut targets = vec!["dataset_id"];
    let mut sources = vec!["?1".to_string()];
    for column in DOCUMENT_COLUMNS {
        let present = legacy.iter().any(|name| name == column);
        let fallback = LEGACY_FALLBACKS
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| *value);
        let source = match (present, fallback) {
            (true, Some(value)) => format!("COALESCE({column}, {value})"),
            (true, None) => column.to_string(),
            (false, Some(value)) => value.to_string(),
            (false, None) => continue,
        };
        targets.push(column);
        sources.push(source);
    }

    tx.execute_batch(DROP_TRIGGERS_SQL)
        .db_context("Failed to drop legacy index triggers")?;
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {FTS_TABLE}"))
        .db_context("Failed to drop legacy full-text index")?;
    tx.execute_batch(&files_table_sql("files_migrated"))
        .db_context("Failed to create migrated files table")?;

    let copied = tx
        .execute(
            &format!(
                "INSERT INTO files_migrated ({}) SELECT {} FROM files ORDER BY rowid",
                targets.join(", "),
                sources.join(", ")
            ),
            params![DEFAULT_DATASET_ID, Timestamp::now().to_string()],
        )
        .db_context("Failed to copy legacy documentation rows")?;

    tx.execute_batch(
        "DROP TABLE files;
         ALTER TABLE files_migrated RENAME TO files;",
    )
    .db_context("Failed to replace legacy files table")?;

    // The index and triggers went away with the old table; let every step
    // run again against the new one.
    tx.execute(
        "DELETE FROM schema_version WHERE version <= ?1",
        [CURRENT_SCHEMA_VERSION],
    )
    .db_context("Failed to reset schema versions")?;

    info!("moved {copied} legacy rows into dataset '{DEFAULT_DATASET_ID}'");
    Ok(true)
}

fn ensure_dataset_metadata(tx: &TxScope<'_>) -> Result<Vec<&'static str>> {
    tx.execute_batch(DATASET_METADATA_SQL)
        .db_context("Failed to create dataset_metadata table")?;

    let existing = table_columns(tx, "dataset_metadata")?;
    let mut added = Vec::new();
    for (column, declaration) in DATASET_METADATA_COLUMNS {
        if existing.iter().any(|(name, _)| name == column) {
            continue;
        }
        let sql = format!("ALTER TABLE dataset_metadata ADD COLUMN {column} {declaration}");
        match tx.execute_batch(&sql) {
            Ok(()) => {
                info!("added dataset_metadata.{column}");
                added.push(column);
            }
            Err(e) if e.to_string().contains("duplicate column name") => {
                debug!("dataset_metadata.{column} already present");
            }
            Err(e) => {
                return Err(StoreError::database(format!(
                    "Failed to add dataset_metadata.{column}"
                ))
                .with_source(e))
            }
        }
    }

    tx.execute(
        "UPDATE dataset_metadata
         SET loaded_at = COALESCE(loaded_at, ?1),
             updated_at = COALESCE(updated_at, loaded_at, ?1)
         WHERE loaded_at IS NULL OR updated_at IS NULL",
        [Timestamp::now().to_string()],
    )
    .db_context("Failed to backfill dataset timestamps")?;

    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_dataset_metadata_parent ON dataset_metadata(parent_dataset_id)",
    )
    .db_context("Failed to index dataset parents")?;

    Ok(added)
}

fn register_default_dataset(tx: &TxScope<'_>) -> Result<()> {
    let now = Timestamp::now().to_string();
    tx.execute(
        "INSERT OR IGNORE INTO dataset_metadata
            (dataset_id, source_dir, files_count, loaded_at, updated_at, dataset_type)
         VALUES (?1, '', (SELECT COUNT(*) FROM files WHERE dataset_id = ?1), ?2, ?2, 'main')",
        params![DEFAULT_DATASET_ID, now],
    )
    .db_context("Failed to register default dataset")?;
    Ok(())
}

fn create_files_table(tx: &TxScope<'_>) -> Result<()> {
    tx.execute_batch(&files_table_sql("files"))
        .db_context("Failed to create files table")?;
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_files_filename ON files(dataset_id, filename);",
    )
    .db_context("Failed to create files indexes")?;
    Ok(())
}

fn create_fts_index(tx: &TxScope<'_>) -> Result<()> {
    let existed = table_exists(tx, FTS_TABLE)?;
    tx.execute_batch(&fts::create_table_sql(FTS_TABLE, CURRENT_TOKENIZER))
        .db_context("Failed to create full-text index")?;
    tx.execute_batch(&fts::create_triggers_sql())
        .db_context("Failed to create full-text triggers")?;
    if !existed {
        tx.execute_batch(&fts::rebuild_sql(FTS_TABLE))
            .db_context("Failed to populate full-text index")?;
    }
    Ok(())
}

/// Rebuilds the full-text index under the current tokenizer when the live
/// index was created with an older one. The new index is built beside the
/// old one and swapped in, so a failure leaves the old index untouched.
fn migrate_tokenizer(tx: &TxScope<'_>) -> Result<()> {
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {FTS_REBUILD_TABLE}"))
        .db_context("Failed to drop stale rebuild table")?;

    let Some(definition) = fts_definition(tx)? else {
        debug!("no full-text index yet, nothing to re-tokenize");
        return Ok(());
    };
    if definition.contains(CURRENT_TOKENIZER) {
        return Ok(());
    }

    info!("rebuilding full-text index with tokenizer `{CURRENT_TOKENIZER}`");
    let swapped = tx.transaction("fts_tokenizer_swap", |swap| {
        swap.execute_batch(&fts::create_table_sql(FTS_REBUILD_TABLE, CURRENT_TOKENIZER))
            .db_context("Failed to create rebuild index")?;
        swap.execute_batch(&fts::rebuild_sql(FTS_REBUILD_TABLE))
            .db_context("Failed to populate rebuild index")?;
        swap.execute_batch(DROP_TRIGGERS_SQL)
            .db_context("Failed to drop full-text triggers")?;
        swap.execute_batch(&format!("DROP TABLE {FTS_TABLE}"))
            .db_context("Failed to drop old full-text index")?;
        swap.execute_batch(&format!(
            "ALTER TABLE {FTS_REBUILD_TABLE} RENAME TO {FTS_TABLE}"
        ))
        .db_context("Failed to swap in rebuilt index")?;
        swap.execute_batch(&fts::create_triggers_sql())
            .db_context("Failed to recreate full-text triggers")?;
        Ok(())
    });

    if let Err(e) = swapped {
        if let Err(cleanup) = tx.execute_batch(&format!("DROP TABLE IF EXISTS {FTS_REBUILD_TABLE}")) {
            warn!("could not drop {FTS_REBUILD_TABLE}: {cleanup}");
        }
        return Err(e);
    }
    Ok(())
}

fn add_tracking_columns(tx: &TxScope<'_>) -> Result<()> {
    for column in ["documented_at_commit", "content_hash"] {
        if !has_column(tx, "files", column)? {
            tx.execute_batch(&format!("ALTER TABLE files ADD COLUMN {column} TEXT"))
                .db_context("Failed to add change tracking column")?;
        }
    }
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_files_context ON files(dataset_id, ddd_context);",
    )
    .db_context("Failed to create context index")?;
    Ok(())
}
