mod common;

use std::path::Path;

use common::{create_main_dataset, init_logging, insert, sample_doc};
use rusqlite::Connection;
use scribe_core::db::fts::{
    create_table_sql, create_triggers_sql, rebuild_sql, CURRENT_TOKENIZER, DROP_TRIGGERS_SQL,
    FTS_REBUILD_TABLE, FTS_TABLE, LEGACY_TOKENIZER,
};
use scribe_core::db::CURRENT_SCHEMA_VERSION;
use scribe_core::{
    FileDocumentation, SqliteStorage, StorageBackend, StoreError, DEFAULT_DATASET_ID,
};
use tempfile::TempDir;

fn table_exists(conn: &Connection, table: &str) -> bool {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = ?1)",
        [table],
        |row| row.get(0),
    )
    .expect("Failed to query sqlite_master")
}

/// Puts the database back into the state an older release left behind:
/// a `unicode61` index and no record of version 3 or later.
fn rewind_to_legacy_index(db_path: &Path) {
    let conn = Connection::open(db_path).expect("Failed to open raw database");
    conn.execute_batch(DROP_TRIGGERS_SQL)
        .expect("Failed to drop triggers");
    conn.execute_batch(&format!("DROP TABLE {FTS_TABLE}"))
        .expect("Failed to drop index");
    conn.execute_batch(&create_table_sql(FTS_TABLE, LEGACY_TOKENIZER))
        .expect("Failed to create legacy index");
    conn.execute_batch(&rebuild_sql(FTS_TABLE))
        .expect("Failed to populate legacy index");
    conn.execute_batch(&create_triggers_sql())
        .expect("Failed to create triggers");
    conn.execute("DELETE FROM schema_version WHERE version >= 3", [])
        .expect("Failed to rewind schema version");
}

#[test]
fn test_reopen_is_idempotent() {
    init_logging();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("nested").join("scribe.db");

    {
        let storage = SqliteStorage::open(&db_path).expect("Failed to open storage");
        create_main_dataset(&storage, "ds");
        insert(&storage, "ds", sample_doc("src/lib.rs", "crate root"));
        storage.close();
    }

    let storage = SqliteStorage::open(&db_path).expect("Failed to reopen storage");
    let report = storage.migrate().expect("Failed to migrate");
    assert!(report.is_noop(), "{report:?}");
    assert_eq!(
        storage.get_schema_version().expect("version"),
        CURRENT_SCHEMA_VERSION
    );
    assert_eq!(
        storage.list_files("ds").expect("list"),
        vec!["src/lib.rs".to_string()]
    );
    assert_eq!(
        storage
            .search_metadata("crate", Some("ds"), 10)
            .expect("search")
            .len(),
        1
    );
}

#[test]
fn test_legacy_files_move_into_default_dataset() {
    init_logging();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("legacy.db");

    {
        let conn = Connection::open(&db_path).expect("Failed to open raw database");
        conn.execute_batch(
            "CREATE TABLE schema_version (version TEXT PRIMARY KEY, applied_at TEXT);
             INSERT INTO schema_version VALUES ('1.0.0', '2024-01-01T00:00:00Z');
             CREATE TABLE files (
                 id INTEGER PRIMARY KEY,
                 filepath TEXT NOT NULL UNIQUE,
                 overview TEXT,
                 functions TEXT,
                 full_content TEXT
             );
             INSERT INTO files (filepath, overview, functions, full_content) VALUES
                 ('src/router.py', 'HTTP router', '{\"route\": {}}', 'def route(): pass'),
                 ('src/models.py', NULL, NULL, NULL);",
        )
        .expect("Failed to seed legacy layout");
    }

    let storage = SqliteStorage::open(&db_path).expect("Failed to open legacy database");

    assert_eq!(
        storage.get_schema_version().expect("version"),
        CURRENT_SCHEMA_VERSION
    );
    let default = storage
        .get_dataset_metadata(DEFAULT_DATASET_ID)
        .expect("read")
        .expect("default dataset registered");
    assert_eq!(default.files_count, 2);

    let router = storage
        .get_file_documentation("src/router.py", DEFAULT_DATASET_ID, true)
        .expect("lookup")
        .found()
        .expect("router migrated");
    assert_eq!(router.overview, "HTTP router");
    assert!(router.functions.contains_key("route"));
    assert_eq!(router.full_content.as_deref(), Some("def route(): pass"));

    let models = storage
        .get_file_documentation("src/models.py", DEFAULT_DATASET_ID, false)
        .expect("lookup")
        .found()
        .expect("models migrated");
    assert_eq!(models.overview, "");
    assert!(models.functions.is_empty());

    let hits = storage
        .search_metadata("router", Some(DEFAULT_DATASET_ID), 10)
        .expect("search");
    assert_eq!(hits.len(), 1);
    let content_hits = storage
        .search_content("route", None, 10)
        .expect("search");
    assert_eq!(content_hits.len(), 1);

    // New documents can be added next to the migrated ones.
    create_main_dataset(&storage, "fresh");
    insert(&storage, "fresh", sample_doc("src/router.py", "new router"));
    assert_eq!(
        storage
            .search_metadata("router", None, 10)
            .expect("search")
            .len(),
        2
    );
}

#[test]
fn test_legacy_tokenizer_is_rebuilt() {
    init_logging();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("scribe.db");

    {
        let storage = SqliteStorage::open(&db_path).expect("Failed to open storage");
        create_main_dataset(&storage, "ds");
        insert(
            &storage,
            "ds",
            FileDocumentation::new("src/vm.c", "dispatches through obj->method and my_var"),
        );
        storage.close();
    }

    rewind_to_legacy_index(&db_path);

    let storage = SqliteStorage::open(&db_path).expect("Failed to reopen storage");

    let info = storage.get_storage_info().expect("info");
    assert_eq!(info.schema_version, CURRENT_SCHEMA_VERSION);
    let definition = info.fts_definition.expect("index exists");
    assert!(definition.contains(CURRENT_TOKENIZER), "{definition}");

    let hits = storage
        .search_metadata("my_var", Some("ds"), 10)
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].filepath, "src/vm.c");

    // The triggers were recreated against the new index.
    insert(&storage, "ds", sample_doc("src/jit.c", "emits obj->method calls"));
    assert_eq!(
        storage
            .search_metadata("obj->method", Some("ds"), 10)
            .expect("search")
            .len(),
        2
    );

    storage.close();
    let conn = Connection::open(&db_path).expect("Failed to open raw database");
    assert!(!table_exists(&conn, FTS_REBUILD_TABLE));
    assert!(table_exists(&conn, FTS_TABLE));
}

#[test]
fn test_failed_tokenizer_swap_keeps_legacy_index() {
    init_logging();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("scribe.db");

    {
        let storage = SqliteStorage::open(&db_path).expect("Failed to open storage");
        create_main_dataset(&storage, "ds");
        insert(
            &storage,
            "ds",
            FileDocumentation::new("src/vm.c", "dispatches through obj->method"),
        );
        storage.close();
    }
    rewind_to_legacy_index(&db_path);

    // A stray table under one of the rebuild index's shadow names makes
    // creating the new index fail inside the swap.
    let blocker = format!("{FTS_REBUILD_TABLE}_data");
    {
        let conn = Connection::open(&db_path).expect("Failed to open raw database");
        conn.execute_batch(&format!("CREATE TABLE {blocker} (id INTEGER PRIMARY KEY)"))
            .expect("Failed to create blocking table");
    }

    match SqliteStorage::open(&db_path) {
        Ok(_) => panic!("tokenizer swap should fail"),
        Err(StoreError::Migration { version, .. }) => assert_eq!(version, 3),
        Err(other) => panic!("expected a migration error, got {other:?}"),
    }

    {
        let conn = Connection::open(&db_path).expect("Failed to open raw database");
        assert!(!table_exists(&conn, FTS_REBUILD_TABLE));

        let definition: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE name = ?1",
                [FTS_TABLE],
                |row| row.get(0),
            )
            .expect("Failed to read index definition");
        assert!(!definition.contains(CURRENT_TOKENIZER), "{definition}");

        let matches: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {FTS_TABLE} WHERE {FTS_TABLE} MATCH 'dispatches'"),
                [],
                |row| row.get(0),
            )
            .expect("Failed to search legacy index");
        assert_eq!(matches, 1);

        let recorded: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM schema_version WHERE version = 3)",
                [],
                |row| row.get(0),
            )
            .expect("Failed to read schema_version");
        assert!(!recorded);

        conn.execute_batch(&format!("DROP TABLE {blocker}"))
            .expect("Failed to drop blocking table");
    }

    // The next startup retries the swap.
    let storage = SqliteStorage::open(&db_path).expect("Failed to reopen storage");
    assert_eq!(
        storage.get_schema_version().expect("version"),
        CURRENT_SCHEMA_VERSION
    );
    let info = storage.get_storage_info().expect("info");
    assert!(info
        .fts_definition
        .expect("index exists")
        .contains(CURRENT_TOKENIZER));
}

#[test]
fn test_partial_dataset_metadata_table_is_completed() {
    init_logging();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("scribe.db");

    {
        let conn = Connection::open(&db_path).expect("Failed to open raw database");
        conn.execute_batch(
            "CREATE TABLE dataset_metadata (
                 dataset_id TEXT PRIMARY KEY,
                 source_dir TEXT NOT NULL,
                 files_count INTEGER NOT NULL DEFAULT 0,
                 loaded_at TEXT
             );
             INSERT INTO dataset_metadata (dataset_id, source_dir, loaded_at)
             VALUES ('old', '/srv/old', '2024-03-01T12:00:00Z');",
        )
        .expect("Failed to seed old dataset table");
    }

    let storage = SqliteStorage::open(&db_path).expect("Failed to open storage");
    let old = storage
        .get_dataset_metadata("old")
        .expect("read")
        .expect("old dataset kept");

    assert_eq!(old.source_dir, "/srv/old");
    assert_eq!(old.dataset_type, scribe_core::DatasetType::Main);
    assert_eq!(old.parent_dataset_id, None);
    assert_eq!(old.updated_at, old.loaded_at);

    let child = storage
        .create_dataset(
            &scribe_core::NewDataset::derived(
                "old-wt",
                "/srv/old-wt",
                scribe_core::DatasetType::Worktree,
                "old",
            )
            .with_branch("hotfix"),
        )
        .expect("create");
    assert!(child.success, "{child}");
}
