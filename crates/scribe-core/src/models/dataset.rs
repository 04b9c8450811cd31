//! Dataset metadata, dataset kinds and identifier validation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Dataset that receives rows migrated from the legacy single-namespace
/// layout.
pub const DEFAULT_DATASET_ID: &str = "default";

const MAX_DATASET_ID_LEN: usize = 64;

/// Type-safe enumeration of dataset kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    /// Primary checkout of a project
    #[default]
    Main,

    /// Secondary VCS worktree derived from a main dataset
    Worktree,

    /// Copy of another dataset that evolves independently
    Fork,

    /// Scratch dataset expected to be discarded
    Temporary,
}

impl FromStr for DatasetType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" => Ok(DatasetType::Main),
            "worktree" => Ok(DatasetType::Worktree),
            "fork" => Ok(DatasetType::Fork),
            "temporary" => Ok(DatasetType::Temporary),
            _ => Err(format!("Invalid dataset type: {s}")),
        }
    }
}

impl DatasetType {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::Main => "main",
            DatasetType::Worktree => "worktree",
            DatasetType::Fork => "fork",
            DatasetType::Temporary => "temporary",
        }
    }

    /// Forks and worktrees only make sense relative to a parent dataset.
    pub fn requires_parent(&self) -> bool {
        matches!(self, DatasetType::Worktree | DatasetType::Fork)
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata row describing one dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetMetadata {
    pub dataset_id: String,

    /// Directory the dataset was documented from
    pub source_dir: String,

    /// Number of documented files, refreshed after every mutation
    pub files_count: u64,

    pub loaded_at: Timestamp,

    pub updated_at: Timestamp,

    #[serde(default)]
    pub dataset_type: DatasetType,

    #[serde(default)]
    pub parent_dataset_id: Option<String>,

    #[serde(default)]
    pub source_branch: Option<String>,
}

/// Request to register a new dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewDataset {
    pub dataset_id: String,
    pub source_dir: String,
    #[serde(default)]
    pub dataset_type: DatasetType,
    #[serde(default)]
    pub parent_dataset_id: Option<String>,
    #[serde(default)]
    pub source_branch: Option<String>,
}

impl NewDataset {
    /// A standalone `main` dataset.
    pub fn main(dataset_id: impl Into<String>, source_dir: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            source_dir: source_dir.into(),
            dataset_type: DatasetType::Main,
            parent_dataset_id: None,
            source_branch: None,
        }
    }

    /// A dataset derived from `parent` (worktree, fork, ...).
    pub fn derived(
        dataset_id: impl Into<String>,
        source_dir: impl Into<String>,
        dataset_type: DatasetType,
        parent: impl Into<String>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            source_dir: source_dir.into(),
            dataset_type,
            parent_dataset_id: Some(parent.into()),
            source_branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.source_branch = Some(branch.into());
        self
    }

    /// Checks identifier syntax and the parent requirement of derived kinds.
    pub fn validate(&self) -> Result<()> {
        validate_dataset_id(&self.dataset_id)?;
        match &self.parent_dataset_id {
            Some(parent) => {
                validate_dataset_id(parent)?;
                if parent == &self.dataset_id {
                    return Err(StoreError::invalid_input("parent_dataset_id")
                        .with_reason("a dataset cannot be its own parent"));
                }
            }
            None if self.dataset_type.requires_parent() => {
                return Err(StoreError::invalid_input("parent_dataset_id").with_reason(
                    format!("datasets of type '{}' require a parent", self.dataset_type),
                ));
            }
            None => {}
        }
        Ok(())
    }
}

/// Partial update of dataset metadata; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetUpdate {
    pub source_dir: Option<String>,
    pub source_branch: Option<String>,
    pub dataset_type: Option<DatasetType>,
}

impl DatasetUpdate {
    pub fn is_empty(&self) -> bool {
        self.source_dir.is_none() && self.source_branch.is_none() && self.dataset_type.is_none()
    }
}

/// Aggregate figures for one dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetStats {
    pub dataset_id: String,
    pub documents: u64,
    /// Documents that carry their full source text
    pub documents_with_content: u64,
    pub total_content_bytes: u64,
    /// Document count per `ddd_context`; untagged files are not counted
    pub ddd_contexts: BTreeMap<String, u64>,
    pub last_documented_at: Option<Timestamp>,
    pub last_commit: Option<String>,
}

/// Validates a dataset identifier.
///
/// Identifiers end up in file names and log lines, so only ASCII letters,
/// digits, `_` and `-` are accepted, up to 64 characters.
pub fn validate_dataset_id(dataset_id: &str) -> Result<()> {
    if dataset_id.is_empty() {
        return Err(StoreError::invalid_input("dataset_id").with_reason("must not be empty"));
    }
    if dataset_id.len() > MAX_DATASET_ID_LEN {
        return Err(StoreError::invalid_input("dataset_id").with_reason(format!(
            "must be at most {MAX_DATASET_ID_LEN} characters"
        )));
    }
    if let Some(bad) = dataset_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(StoreError::invalid_input("dataset_id").with_reason(format!(
            "contains disallowed character {bad:?}; use letters, digits, '_' or '-'"
        )));
    }
    Ok(())
}
