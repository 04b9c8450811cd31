//! Tunables for the SQLite storage engine.
//!
//! Loading these values from a file is left to the caller; the struct only
//! derives [`Deserialize`] so any config source can produce it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Configuration for [`crate::db::SqliteStorage`] and its connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of live connections held by the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long `acquire` waits for a free connection, in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// SQLite busy timeout applied to every connection, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Upper bound for a single search statement, in milliseconds.
    /// `None` lets searches run unbounded.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: Option<u64>,

    /// Rows per multi-row statement during batch writes.
    #[serde(default = "default_batch_chunk_size")]
    pub batch_chunk_size: usize,

    /// Enable write-ahead logging.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_query_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_batch_chunk_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            batch_chunk_size: default_batch_chunk_size(),
            enable_wal: true,
        }
    }
}

impl StoreConfig {
    /// Rejects values the pool or batch writer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(StoreError::Configuration {
                message: "max_connections must be at least 1".to_string(),
            });
        }
        if self.batch_chunk_size == 0 {
            return Err(StoreError::Configuration {
                message: "batch_chunk_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"max_connections": 2}"#).expect("parse config");
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.batch_chunk_size, 100);
        assert_eq!(config.query_timeout(), Some(Duration::from_secs(30)));
        assert!(config.enable_wal);
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let config = StoreConfig {
            max_connections: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StoreError::Configuration { .. })
        ));
        assert!(StoreConfig::default().validate().is_ok());
    }
}
