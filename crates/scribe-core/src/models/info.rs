//! Storage-level diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::db::PoolStats;

/// Snapshot of the database file and its pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageInfo {
    pub backend: String,
    pub database_path: PathBuf,
    pub file_size_bytes: u64,
    pub schema_version: i64,
    pub datasets: u64,
    pub documents: u64,
    /// `CREATE VIRTUAL TABLE` statement of the live full-text index
    pub fts_definition: Option<String>,
    pub page_size: i64,
    pub page_count: i64,
    pub journal_mode: String,
    pub pool: PoolStats,
}
