//! Bounded pool of SQLite connections.
//!
//! Every connection is opened with foreign keys on, WAL journaling (unless
//! disabled) and a busy timeout. Connections come back to the pool when the
//! [`ScopedConnection`] is dropped. A connection that was returned inside an
//! open transaction, during a panic, or after an interrupted statement is
//! closed instead of reused.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::RwLock;
use rusqlite::types::Value;
use rusqlite::{Connection, Params};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::{DatabaseResultExt, Result, StoreError};

/// Lifetime counters shared by the manager and every connection it opens.
#[derive(Debug, Default)]
struct PoolCounters {
    opened: AtomicU64,
    closed: AtomicU64,
    discarded: AtomicU64,
}

/// A SQLite connection owned by the pool.
pub struct PooledSqlite {
    conn: Connection,
    broken: bool,
    counters: Arc<PoolCounters>,
}

impl Drop for PooledSqlite {
    fn drop(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Opens and validates connections on behalf of r2d2.
#[derive(Debug)]
struct SqliteConnectionManager {
    path: PathBuf,
    busy_timeout: Duration,
    enable_wal: bool,
    counters: Arc<PoolCounters>,
}

impl r2d2::ManageConnection for SqliteConnectionManager {
    type Connection = PooledSqlite;
    type Error = rusqlite::Error;

    fn connect(&self) -> std::result::Result<PooledSqlite, rusqlite::Error> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        if self.enable_wal {
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                debug!("journal mode for {} stays '{mode}'", self.path.display());
            }
        }

        self.counters.opened.fetch_add(1, Ordering::Relaxed);
        Ok(PooledSqlite {
            conn,
            broken: false,
            counters: Arc::clone(&self.counters),
        })
    }

    fn is_valid(&self, conn: &mut PooledSqlite) -> std::result::Result<(), rusqlite::Error> {
        conn.conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn has_broken(&self, conn: &mut PooledSqlite) -> bool {
        let broken = conn.broken || !conn.conn.is_autocommit();
        if broken {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            warn!("discarding connection to {}", self.path.display());
        }
        broken
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStats {
    /// Upper bound on live connections
    pub max: u32,
    /// Live connections, idle or checked out
    pub created: u32,
    /// Idle connections ready to hand out
    pub available: u32,
    pub in_use: u32,
    pub closed: bool,
    /// Connections opened since the pool was created
    pub total_opened: u64,
    /// Connections closed since the pool was created, including discards
    pub total_closed: u64,
    /// Connections dropped on return: broken, interrupted, mid-transaction
    /// or released during a panic
    pub discarded: u64,
}

/// Thread-safe pool of SQLite connections to one database file.
pub struct ConnectionPool {
    inner: RwLock<Option<r2d2::Pool<SqliteConnectionManager>>>,
    path: PathBuf,
    max_connections: u32,
    acquire_timeout: Duration,
    counters: Arc<PoolCounters>,
}

impl ConnectionPool {
    /// Creates a pool for `path`. Connections are opened lazily.
    pub fn new<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let counters = Arc::new(PoolCounters::default());

        let manager = SqliteConnectionManager {
            path: path.clone(),
            busy_timeout: config.busy_timeout(),
            enable_wal: config.enable_wal,
            counters: Arc::clone(&counters),
        };

        let pool = r2d2::Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(0))
            .idle_timeout(None)
            .max_lifetime(None)
            .test_on_check_out(true)
            .connection_timeout(config.acquire_timeout())
            .build(manager)
            .map_err(|e| StoreError::Pool {
                message: format!("Failed to build connection pool: {e}"),
            })?;

        debug!(
            "connection pool for {} ready (max {} connections)",
            path.display(),
            config.max_connections
        );

        Ok(Self {
            inner: RwLock::new(Some(pool)),
            path,
            max_connections: config.max_connections,
            acquire_timeout: config.acquire_timeout(),
            counters,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks out a connection, waiting up to the configured acquire timeout.
    pub fn acquire(&self) -> Result<ScopedConnection> {
        self.acquire_within(self.acquire_timeout)
    }

    /// Checks out a connection, waiting at most `timeout`.
    pub fn acquire_within(&self, timeout: Duration) -> Result<ScopedConnection> {
        // Clone the handle so a waiting caller does not block `close`.
        let pool = self.inner.read().clone().ok_or(StoreError::PoolClosed)?;

        let started = Instant::now();
        match pool.get_timeout(timeout) {
            Ok(conn) => {
                debug!("checked out connection after {:?}", started.elapsed());
                Ok(ScopedConnection { conn })
            }
            Err(_) if self.is_closed() => Err(StoreError::PoolClosed),
            // Below capacity means r2d2 kept failing to open a connection.
            Err(e) if pool.state().connections < self.max_connections => {
                warn!("cannot open a connection to {}: {e}", self.path.display());
                Err(StoreError::Pool {
                    message: format!("Failed to connect to {}: {e}", self.path.display()),
                })
            }
            Err(e) => {
                let waited = started.elapsed();
                warn!(
                    "no connection to {} after {waited:?}: {e}",
                    self.path.display()
                );
                Err(StoreError::PoolTimeout { waited })
            }
        }
    }

    /// Runs one statement on a pooled connection and returns every row as a
    /// list of dynamically typed values. Statements that produce no rows
    /// return an empty list.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Vec<Value>>> {
        self.execute_with_timeout(sql, params, None)
    }

    /// Like [`ConnectionPool::execute`], interrupting the statement once
    /// `timeout` has elapsed.
    pub fn execute_with_timeout<P: Params>(
        &self,
        sql: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<Value>>> {
        let mut conn = self.acquire()?;
        conn.with_timeout(timeout, |c| query_values(c, sql, params))
    }

    /// Stops handing out connections and closes idle ones. Connections that
    /// are checked out close when their holder drops them.
    pub fn close(&self) {
        if let Some(pool) = self.inner.write().take() {
            let state = pool.state();
            info!(
                "closing connection pool for {} ({} idle, {} in use)",
                self.path.display(),
                state.idle_connections,
                state.connections - state.idle_connections
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().is_none()
    }

    pub fn stats(&self) -> PoolStats {
        let (created, available, closed) = match self.inner.read().as_ref() {
            Some(pool) => {
                let state = pool.state();
                (state.connections, state.idle_connections, false)
            }
            None => (0, 0, true),
        };

        PoolStats {
            max: self.max_connections,
            created,
            available,
            in_use: created.saturating_sub(available),
            closed,
            total_opened: self.counters.opened.load(Ordering::Relaxed),
            total_closed: self.counters.closed.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

/// A checked-out connection. Returns to the pool on drop.
pub struct ScopedConnection {
    conn: r2d2::PooledConnection<SqliteConnectionManager>,
}

impl ScopedConnection {
    /// Marks the connection so the pool closes it instead of reusing it.
    pub fn discard(&mut self) {
        self.conn.broken = true;
    }

    /// Runs `f` with a deadline. When `timeout` passes before `f` returns,
    /// the running statement is interrupted, the connection is discarded and
    /// the call fails with [`StoreError::QueryTimeout`].
    pub fn with_timeout<T, F>(&mut self, timeout: Option<Duration>, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let Some(timeout) = timeout else {
            return f(&self.conn.conn);
        };

        let handle = self.conn.conn.get_interrupt_handle();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let watchdog = thread::spawn(move || {
            if let Err(mpsc::RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                handle.interrupt();
                true
            } else {
                false
            }
        });

        let result = f(&self.conn.conn);
        // The receiver may already be gone if the watchdog fired.
        let _ = done_tx.send(());
        let interrupted = watchdog.join().unwrap_or(false);

        if !interrupted {
            return result;
        }

        self.discard();
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("query interrupted after {timeout:?}: {e}");
                Err(StoreError::QueryTimeout { timeout })
            }
        }
    }
}

impl Deref for ScopedConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn.conn
    }
}

impl DerefMut for ScopedConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn.conn
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if thread::panicking() {
            self.conn.broken = true;
        }
    }
}

fn query_values<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Vec<Value>>> {
    let mut stmt = conn.prepare(sql).db_context("Failed to prepare statement")?;
    let columns = stmt.column_count();
    let rows = stmt
        .query_map(params, |row| {
            (0..columns)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .db_context("Failed to execute statement")?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .db_context("Failed to read statement results")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pool(max_connections: u32, acquire_timeout_ms: u64) -> (TempDir, ConnectionPool) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = StoreConfig {
            max_connections,
            acquire_timeout_ms,
            ..StoreConfig::default()
        };
        let pool = ConnectionPool::new(dir.path().join("pool.db"), &config)
            .expect("Failed to create pool");
        (dir, pool)
    }

    #[test]
    fn test_connections_are_configured() {
        let (_dir, pool) = pool(2, 1_000);
        let conn = pool.acquire().expect("Failed to acquire");

        let foreign_keys: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .expect("Failed to read pragma");
        let journal: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .expect("Failed to read pragma");

        assert_eq!(foreign_keys, 1);
        assert_eq!(journal.to_lowercase(), "wal");
    }

    #[test]
    fn test_connection_is_reused() {
        let (_dir, pool) = pool(2, 1_000);
        drop(pool.acquire().expect("first acquire"));
        drop(pool.acquire().expect("second acquire"));

        let stats = pool.stats();
        assert_eq!(stats.total_opened, 1);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[test]
    fn test_execute_returns_rows() {
        let (_dir, pool) = pool(1, 1_000);
        pool.execute("CREATE TABLE t (a INTEGER, b TEXT)", [])
            .expect("create");
        pool.execute("INSERT INTO t VALUES (1, 'x'), (2, NULL)", [])
            .expect("insert");

        let rows = pool
            .execute("SELECT a, b FROM t WHERE a >= ?1 ORDER BY a", [1])
            .expect("select");

        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(1), Value::Text("x".to_string())],
                vec![Value::Integer(2), Value::Null],
            ]
        );
    }

    #[test]
    fn test_open_transaction_discards_connection() {
        let (_dir, pool) = pool(1, 1_000);
        {
            let conn = pool.acquire().expect("acquire");
            conn.execute_batch("BEGIN").expect("begin");
        }

        let conn = pool.acquire().expect("acquire after discard");
        assert!(conn.is_autocommit());
        assert_eq!(pool.stats().total_opened, 2);
    }

    #[test]
    fn test_statement_past_deadline_is_interrupted() {
        let (_dir, pool) = pool(1, 1_000);
        let started = Instant::now();

        let err = pool
            .execute_with_timeout(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
                [],
                Some(Duration::from_millis(100)),
            )
            .expect_err("runaway query must be interrupted");

        assert!(matches!(err, StoreError::QueryTimeout { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));

        // The interrupted connection is not handed out again.
        drop(pool.acquire().expect("acquire"));
        assert_eq!(pool.stats().total_opened, 2);
    }
}
