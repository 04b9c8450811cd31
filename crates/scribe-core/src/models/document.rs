//! File documentation model definition.

use std::collections::BTreeMap;
use std::path::Path;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mapping from a symbol name to its free-form attribute record
/// (signature, description, parameters, ...).
pub type SymbolTable = BTreeMap<String, Value>;

/// Generated documentation for one source file within one dataset.
///
/// `(dataset, filepath)` is the unique key; the dataset is supplied
/// separately on every storage call rather than stored in the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileDocumentation {
    /// Path of the file relative to the dataset's source directory
    pub filepath: String,

    /// Final path component of `filepath`
    pub filename: String,

    /// Free-text summary of what the file does
    #[serde(default)]
    pub overview: String,

    /// Optional domain tag (bounded context) the file belongs to
    #[serde(default)]
    pub ddd_context: Option<String>,

    #[serde(default)]
    pub functions: SymbolTable,

    #[serde(default)]
    pub exports: SymbolTable,

    #[serde(default)]
    pub imports: SymbolTable,

    #[serde(default)]
    pub types_interfaces_classes: SymbolTable,

    #[serde(default)]
    pub constants: SymbolTable,

    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub other_notes: Vec<String>,

    /// Verbatim file text; omitted from lookups unless explicitly requested
    #[serde(default)]
    pub full_content: Option<String>,

    /// VCS commit the documentation was generated from
    #[serde(default)]
    pub documented_at_commit: Option<String>,

    /// When the documentation was generated (UTC)
    pub documented_at: Timestamp,

    /// Hash of the source file used for change detection
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl FileDocumentation {
    /// Creates a record for `filepath` with the given overview, deriving the
    /// filename from the last path component and stamping it with the
    /// current time.
    pub fn new(filepath: impl Into<String>, overview: impl Into<String>) -> Self {
        let filepath = filepath.into();
        let filename = Self::filename_of(&filepath);
        Self {
            filepath,
            filename,
            overview: overview.into(),
            ddd_context: None,
            functions: SymbolTable::new(),
            exports: SymbolTable::new(),
            imports: SymbolTable::new(),
            types_interfaces_classes: SymbolTable::new(),
            constants: SymbolTable::new(),
            dependencies: Vec::new(),
            other_notes: Vec::new(),
            full_content: None,
            documented_at_commit: None,
            documented_at: Timestamp::now(),
            content_hash: None,
        }
    }

    /// Returns the final component of a slash separated path.
    pub fn filename_of(filepath: &str) -> String {
        Path::new(filepath)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| filepath.to_string())
    }

    pub fn with_ddd_context(mut self, context: impl Into<String>) -> Self {
        self.ddd_context = Some(context.into());
        self
    }

    pub fn with_full_content(mut self, content: impl Into<String>) -> Self {
        self.full_content = Some(content.into());
        self
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.documented_at_commit = Some(commit.into());
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_function(mut self, name: impl Into<String>, record: Value) -> Self {
        self.functions.insert(name.into(), record);
        self
    }
}
