//! Data models for documented files and datasets.
//!
//! This module contains the domain types exchanged through the
//! [`crate::backend::StorageBackend`] contract. None of them carry database
//! handles or on-disk encodings: symbol tables are typed maps in memory and
//! are only turned into JSON text at the storage boundary in [`crate::db`].
//!
//! ## Model Overview
//!
//! - [`FileDocumentation`]: one documented source file within one dataset
//! - [`DatasetMetadata`]: a named collection of documented files
//! - [`SearchResult`] / [`UnifiedSearchResults`]: transient search projections
//! - [`BatchOperationResult`] / [`OperationResult`]: outcomes of writes
//! - [`DocumentUpdate`]: the closed set of fields a partial update may touch

mod batch;
mod dataset;
mod document;
mod info;
mod search;
mod update;

#[cfg(test)]
mod tests;

pub use batch::{BatchOperationResult, OperationResult};
pub use dataset::{
    validate_dataset_id, DatasetMetadata, DatasetStats, DatasetType, DatasetUpdate, NewDataset,
    DEFAULT_DATASET_ID,
};
pub use document::{FileDocumentation, SymbolTable};
pub use info::StorageInfo;
pub use search::{FileLookup, SearchResult, SearchStats, UnifiedSearchResults};
pub use update::DocumentUpdate;
