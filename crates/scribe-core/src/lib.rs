//! Core library for the Scribe documentation store.
//!
//! Scribe keeps generated documentation for source files (overviews, symbol
//! tables, dependencies, optionally the full text) in a single SQLite file
//! and answers ranked full-text searches over it. Documents are grouped in
//! datasets, so several checkouts of one project (a main tree, worktrees,
//! forks) can live side by side.
//!
//! # Layers
//!
//! - **Models** ([`models`]): plain domain types, no storage concerns
//! - **Backend contract** ([`backend`]): the [`StorageBackend`] trait every
//!   engine implements
//! - **SQLite engine** ([`db`]): connection pool, nestable transactions,
//!   migrations and the FTS5 index behind [`SqliteStorage`]
//! - **Async API** ([`store`]): [`DocStore`], which runs backend calls on
//!   tokio's blocking pool
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use scribe_core::{DocStoreBuilder, FileDocumentation, NewDataset};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = DocStoreBuilder::new()
//!     .with_database_path(Some("docs.db"))
//!     .build()
//!     .await?;
//!
//! store
//!     .create_dataset(NewDataset::main("docs-main", "/home/user/project"))
//!     .await?;
//!
//! let doc = FileDocumentation::new("src/app.py", "entry point");
//! store.insert_documentation(doc, "docs-main").await?;
//!
//! for hit in store.search_metadata("entry point", Some("docs-main"), 10).await? {
//!     println!("{hit}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;

// Re-export commonly used types
pub use backend::StorageBackend;
pub use config::StoreConfig;
pub use db::{ConnectionPool, PoolStats, SqliteStorage};
pub use error::{Result, StoreError};
pub use models::{
    BatchOperationResult, DatasetMetadata, DatasetStats, DatasetType, DatasetUpdate,
    DocumentUpdate, FileDocumentation, FileLookup, NewDataset, OperationResult, SearchResult,
    SearchStats, StorageInfo, SymbolTable, UnifiedSearchResults, DEFAULT_DATASET_ID,
};
pub use store::{DocStore, DocStoreBuilder};
