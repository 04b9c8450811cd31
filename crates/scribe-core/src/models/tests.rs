//! Tests for the models module.

use super::*;
use crate::error::StoreError;

fn hit(dataset: &str, filepath: &str, score: f64) -> SearchResult {
    SearchResult {
        filepath: filepath.to_string(),
        filename: FileDocumentation::filename_of(filepath),
        dataset: dataset.to_string(),
        score,
        snippet: String::new(),
        overview: None,
        ddd_context: None,
    }
}

#[test]
fn test_dataset_id_validation() {
    assert!(validate_dataset_id("docs-main").is_ok());
    assert!(validate_dataset_id("feature_42").is_ok());

    for bad in ["", "../etc", "a b", "drop;table", "x.y", "ds/1"] {
        let err = validate_dataset_id(bad).expect_err("identifier must be rejected");
        assert!(
            matches!(err, StoreError::InvalidInput { ref field, .. } if field == "dataset_id"),
            "unexpected error for {bad:?}: {err}"
        );
    }

    let too_long = "a".repeat(65);
    assert!(validate_dataset_id(&too_long).is_err());
    assert!(validate_dataset_id(&"a".repeat(64)).is_ok());
}

#[test]
fn test_derived_dataset_requires_parent() {
    let mut fork = NewDataset::main("fork-1", "/repo");
    fork.dataset_type = DatasetType::Fork;
    assert!(fork.validate().is_err());

    let fork = NewDataset::derived("fork-1", "/repo", DatasetType::Fork, "main");
    assert!(fork.validate().is_ok());

    let own_parent = NewDataset::derived("loop", "/repo", DatasetType::Worktree, "loop");
    assert!(own_parent.validate().is_err());

    let temp = NewDataset {
        dataset_type: DatasetType::Temporary,
        ..NewDataset::main("scratch", "/tmp")
    };
    assert!(temp.validate().is_ok());
}

#[test]
fn test_dataset_type_round_trip() {
    for kind in [
        DatasetType::Main,
        DatasetType::Worktree,
        DatasetType::Fork,
        DatasetType::Temporary,
    ] {
        assert_eq!(kind.as_str().parse::<DatasetType>(), Ok(kind));
    }
    assert!("branch".parse::<DatasetType>().is_err());
    assert_eq!("WORKTREE".parse::<DatasetType>(), Ok(DatasetType::Worktree));
}

#[test]
fn test_unified_merge_never_duplicates() {
    let metadata = vec![hit("ds", "src/a.rs", 3.0), hit("ds", "src/b.rs", 2.0)];
    let content = vec![
        hit("ds", "src/b.rs", 5.0),
        hit("ds", "src/c.rs", 1.0),
        hit("ds", "src/a.rs", 0.5),
    ];

    let merged = UnifiedSearchResults::merge(metadata, content);

    let meta: Vec<_> = merged
        .metadata_results
        .iter()
        .map(|r| r.filepath.as_str())
        .collect();
    let content_only: Vec<_> = merged
        .content_only_results
        .iter()
        .map(|r| r.filepath.as_str())
        .collect();

    assert_eq!(meta, vec!["src/a.rs", "src/b.rs"]);
    assert_eq!(content_only, vec!["src/c.rs"]);
    assert_eq!(
        merged.stats,
        SearchStats {
            total_metadata_matches: 2,
            total_content_matches: 3,
            unique_files: 3,
            duplicates: 2,
        }
    );
}

#[test]
fn test_unified_merge_claims_filepath_across_datasets() {
    let metadata = vec![hit("main", "src/a.rs", 1.0), hit("fork", "src/a.rs", 0.8)];
    let content = vec![hit("scratch", "src/a.rs", 1.0), hit("fork", "src/d.rs", 0.2)];

    let merged = UnifiedSearchResults::merge(metadata, content);

    assert_eq!(merged.metadata_results.len(), 2);
    assert_eq!(merged.content_only_results.len(), 1);
    assert_eq!(merged.content_only_results[0].filepath, "src/d.rs");
    assert_eq!(merged.stats.duplicates, 1);
    assert_eq!(merged.stats.unique_files, 2);
}

#[test]
fn test_batch_result_accounting() {
    let mut result = BatchOperationResult::new(4);
    result.record_success();
    result.record_success();
    result.record_success();
    result.record_failure("src/bad.rs", "empty filepath");

    assert_eq!(result.successful, 3);
    assert_eq!(result.failed, 1);
    assert!((result.success_rate() - 0.75).abs() < f64::EPSILON);
    assert!(!result.is_complete_success());
    assert!(result.to_string().contains("src/bad.rs: empty filepath"));

    assert_eq!(BatchOperationResult::new(0).success_rate(), 0.0);
}

#[test]
fn test_document_update_apply() {
    let mut doc = FileDocumentation::new("src/lib.rs", "old");

    DocumentUpdate::Overview("new".to_string()).apply(&mut doc);
    DocumentUpdate::Dependencies(vec!["serde".to_string()]).apply(&mut doc);
    DocumentUpdate::ContentHash(Some("abc".to_string())).apply(&mut doc);

    assert_eq!(doc.overview, "new");
    assert_eq!(doc.dependencies, vec!["serde".to_string()]);
    assert_eq!(doc.content_hash.as_deref(), Some("abc"));
    assert_eq!(DocumentUpdate::Constants(SymbolTable::new()).column(), "constants");
}

#[test]
fn test_document_update_serde_shape() {
    let update: DocumentUpdate =
        serde_json::from_str(r#"{"field": "ddd_context", "value": "billing"}"#)
            .expect("parse update");
    assert_eq!(update, DocumentUpdate::DddContext(Some("billing".to_string())));

    let unknown = serde_json::from_str::<DocumentUpdate>(r#"{"field": "filepath", "value": "x"}"#);
    assert!(unknown.is_err(), "identity fields are not updatable");
}

#[test]
fn test_filename_derivation() {
    assert_eq!(FileDocumentation::filename_of("src/app.py"), "app.py");
    assert_eq!(FileDocumentation::filename_of("Makefile"), "Makefile");
    let doc = FileDocumentation::new("a/b/c.ts", "overview");
    assert_eq!(doc.filename, "c.ts");
}
