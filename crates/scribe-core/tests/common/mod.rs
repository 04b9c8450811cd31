#![allow(dead_code)]

use scribe_core::{
    DocStore, DocStoreBuilder, FileDocumentation, NewDataset, SqliteStorage, StorageBackend,
    StoreConfig,
};
use serde_json::json;
use tempfile::TempDir;

/// Routes `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Helper function to create a storage engine in a fresh directory
pub fn create_test_storage() -> (TempDir, SqliteStorage) {
    create_test_storage_with(StoreConfig::default())
}

pub fn create_test_storage_with(config: StoreConfig) -> (TempDir, SqliteStorage) {
    init_logging();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let storage = SqliteStorage::open_with_config(temp_dir.path().join("scribe.db"), config)
        .expect("Failed to open storage");
    (temp_dir, storage)
}

/// Helper function to create an async store
pub async fn create_test_store() -> (TempDir, DocStore) {
    init_logging();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("scribe.db");
    let store = DocStoreBuilder::new()
        .with_database_path(Some(&db_path))
        .build()
        .await
        .expect("Failed to create store");
    (temp_dir, store)
}

/// A document with a couple of symbols and some source text.
pub fn sample_doc(filepath: &str, overview: &str) -> FileDocumentation {
    FileDocumentation::new(filepath, overview)
        .with_function(
            "run",
            json!({"signature": "fn run() -> Result<()>", "description": "entry"}),
        )
        .with_full_content(format!("// {filepath}\nfn run() {{}}\n"))
}

/// Registers a main dataset, panicking if that fails.
pub fn create_main_dataset(storage: &SqliteStorage, dataset_id: &str) {
    let result = storage
        .create_dataset(&NewDataset::main(dataset_id, "/work/project"))
        .expect("Failed to create dataset");
    assert!(result.success, "{result}");
}

pub fn insert(storage: &SqliteStorage, dataset: &str, doc: FileDocumentation) {
    let result = storage
        .insert_documentation(&doc, dataset)
        .expect("Failed to insert documentation");
    assert!(result.success, "{result}");
}
