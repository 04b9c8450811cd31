//! Nestable transactions and chunked multi-row writes.
//!
//! [`transaction`] opens a real transaction when the connection is in
//! autocommit mode and a uniquely named savepoint otherwise, so operations
//! compose: an inner failure rolls back only the inner work and the outer
//! scope decides what happens next. The scope is passed explicitly as a
//! [`TxScope`] rather than tracked per thread.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::error::{DatabaseResultExt, Result, StoreError};

static SAVEPOINT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// How a top-level transaction acquires its locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeginMode {
    /// Take locks on first use
    #[default]
    Deferred,
    /// Take the write lock up front
    Immediate,
}

impl BeginMode {
    fn statement(self) -> &'static str {
        match self {
            BeginMode::Deferred => "BEGIN DEFERRED",
            BeginMode::Immediate => "BEGIN IMMEDIATE",
        }
    }
}

/// An open transaction or savepoint.
///
/// Dereferences to the underlying [`Connection`]; use
/// [`TxScope::transaction`] to open a nested scope.
pub struct TxScope<'c> {
    conn: &'c Connection,
    name: String,
    depth: usize,
}

impl<'c> TxScope<'c> {
    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// Nesting level: 0 for a top-level transaction.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` inside a savepoint nested in this scope.
    pub fn transaction<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&TxScope<'c>) -> Result<T>,
    {
        run(self.conn, name, BeginMode::Deferred, Some(self.depth), f)
    }
}

impl Deref for TxScope<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

/// Runs `f` in a deferred transaction, or in a savepoint when `conn` already
/// has one open. Commits on `Ok`, rolls back on `Err` or panic.
pub fn transaction<'c, T, F>(conn: &'c Connection, name: &str, f: F) -> Result<T>
where
    F: FnOnce(&TxScope<'c>) -> Result<T>,
{
    run(conn, name, BeginMode::Deferred, None, f)
}

/// Like [`transaction`] with an explicit begin mode. The mode only applies
/// when a new top-level transaction is started.
pub fn transaction_with_mode<'c, T, F>(
    conn: &'c Connection,
    name: &str,
    mode: BeginMode,
    f: F,
) -> Result<T>
where
    F: FnOnce(&TxScope<'c>) -> Result<T>,
{
    run(conn, name, mode, None, f)
}

fn run<'c, T, F>(
    conn: &'c Connection,
    name: &str,
    mode: BeginMode,
    parent_depth: Option<usize>,
    f: F,
) -> Result<T>
where
    F: FnOnce(&TxScope<'c>) -> Result<T>,
{
    let (pending, depth) = if conn.is_autocommit() {
        conn.execute_batch(mode.statement())
            .db_context("Failed to begin transaction")?;
        (Pending::new(conn, Boundary::Transaction), 0)
    } else {
        let savepoint = savepoint_name(name);
        conn.execute_batch(&format!("SAVEPOINT {savepoint}"))
            .db_context("Failed to create savepoint")?;
        let depth = parent_depth.map_or(1, |d| d + 1);
        (Pending::new(conn, Boundary::Savepoint(savepoint)), depth)
    };

    let scope = TxScope {
        conn,
        name: name.to_string(),
        depth,
    };

    match f(&scope) {
        Ok(value) => {
            pending.commit()?;
            Ok(value)
        }
        Err(e) => {
            debug!("rolling back '{name}' at depth {depth}: {e}");
            pending.rollback();
            Err(e)
        }
    }
}

fn savepoint_name(name: &str) -> String {
    let label: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(32)
        .collect();
    let sequence = SAVEPOINT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("sp_{label}_{sequence}")
}

enum Boundary {
    Transaction,
    Savepoint(String),
}

/// Rolls back on drop unless committed.
struct Pending<'c> {
    conn: &'c Connection,
    boundary: Boundary,
    finished: bool,
}

impl<'c> Pending<'c> {
    fn new(conn: &'c Connection, boundary: Boundary) -> Self {
        Self {
            conn,
            boundary,
            finished: false,
        }
    }

    fn commit(mut self) -> Result<()> {
        let sql = match &self.boundary {
            Boundary::Transaction => "COMMIT".to_string(),
            Boundary::Savepoint(name) => format!("RELEASE {name}"),
        };
        self.conn
            .execute_batch(&sql)
            .db_context("Failed to commit transaction")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self) {
        self.finished = true;
        self.undo();
    }

    fn undo(&self) {
        let sql = match &self.boundary {
            // SQLite may already have rolled back on its own (e.g. SQLITE_FULL).
            Boundary::Transaction if self.conn.is_autocommit() => return,
            Boundary::Transaction => "ROLLBACK".to_string(),
            Boundary::Savepoint(name) => format!("ROLLBACK TO {name}; RELEASE {name}"),
        };
        if let Err(e) = self.conn.execute_batch(&sql) {
            warn!("rollback failed: {e}");
        }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.undo();
        }
    }
}

/// Host parameter limit of the bundled SQLite build.
pub const MAX_BOUND_PARAMETERS: usize = 32_766;

/// Shape of a multi-row `INSERT`: everything before the value tuples, the
/// number of values per row, and everything after (typically an
/// `ON CONFLICT` clause).
#[derive(Debug, Clone, Copy)]
pub struct BatchStatement<'a> {
    pub head: &'a str,
    pub columns: usize,
    pub tail: &'a str,
}

impl BatchStatement<'_> {
    /// SQL text for `rows` value tuples.
    pub fn sql_for(&self, rows: usize) -> String {
        let tuple = format!("({})", vec!["?"; self.columns].join(", "));
        let values = vec![tuple.as_str(); rows].join(", ");
        if self.tail.is_empty() {
            format!("{} {values}", self.head)
        } else {
            format!("{} {values} {}", self.head, self.tail)
        }
    }

    /// Largest number of rows one statement can bind.
    pub fn max_rows(&self) -> usize {
        (MAX_BOUND_PARAMETERS / self.columns.max(1)).max(1)
    }
}

/// Writes rows in fixed-size chunks inside one transaction.
///
/// Either every row is written or, on the first failure, none are.
pub struct BatchWriter<'p> {
    chunk_size: usize,
    progress: Option<Box<dyn FnMut(usize, usize) + 'p>>,
}

impl<'p> BatchWriter<'p> {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            progress: None,
        }
    }

    /// Calls `callback(rows_written, total_rows)` after each chunk.
    pub fn on_progress(mut self, callback: impl FnMut(usize, usize) + 'p) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Writes `rows` and returns the number of rows SQLite reports changed.
    pub fn write(
        &mut self,
        conn: &Connection,
        statement: &BatchStatement<'_>,
        rows: &[Vec<Value>],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        if let Some(position) = rows.iter().position(|row| row.len() != statement.columns) {
            return Err(StoreError::invalid_input("rows").with_reason(format!(
                "row {position} has {} values, expected {}",
                rows[position].len(),
                statement.columns
            )));
        }

        let total = rows.len();
        let chunk_size = self.chunk_size.min(statement.max_rows());
        if chunk_size < self.chunk_size {
            debug!(
                "batch chunk of {} rows exceeds the parameter limit, using {chunk_size}",
                self.chunk_size
            );
        }
        let progress = &mut self.progress;

        transaction(conn, "batch_write", |tx| {
            let mut written = 0;
            let mut changed = 0;
            for chunk in rows.chunks(chunk_size) {
                let mut stmt = tx
                    .prepare_cached(&statement.sql_for(chunk.len()))
                    .db_context("Failed to prepare batch statement")?;
                changed += stmt
                    .execute(params_from_iter(chunk.iter().flatten()))
                    .db_context("Batch write failed")?;
                written += chunk.len();
                if let Some(callback) = progress.as_mut() {
                    callback(written, total);
                }
            }
            Ok(changed)
        })
    }
}
