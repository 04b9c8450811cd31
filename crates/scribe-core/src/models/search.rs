//! Search projections and the unified-search merge.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::FileDocumentation;

/// One hit from a full-text scan. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub filepath: String,
    pub filename: String,
    pub dataset: String,

    /// Negated FTS5 bm25 rank. Higher is better; the scale is opaque and
    /// only meaningful for ordering results of the same query.
    pub score: f64,

    /// Matched text with `<mark>`/`</mark>` around each hit
    pub snippet: String,

    #[serde(default)]
    pub overview: Option<String>,

    #[serde(default)]
    pub ddd_context: Option<String>,
}

impl fmt::Display for SearchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({:.3})", self.dataset, self.filepath, self.score)?;
        if !self.snippet.is_empty() {
            write!(f, " {}", self.snippet)?;
        }
        Ok(())
    }
}

/// Counters describing how the two scans of a unified search overlapped.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchStats {
    pub total_metadata_matches: usize,
    pub total_content_matches: usize,
    pub unique_files: usize,
    /// Filepaths found by both scans
    pub duplicates: usize,
}

/// Result of a unified metadata + content search.
///
/// A file appears in at most one of the two lists: metadata matches win,
/// content hits for the same file are only counted in [`SearchStats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnifiedSearchResults {
    pub metadata_results: Vec<SearchResult>,
    pub content_only_results: Vec<SearchResult>,
    pub stats: SearchStats,
}

impl UnifiedSearchResults {
    /// Merges the two scans by filepath.
    ///
    /// A filepath found by the metadata scan in any dataset claims every
    /// content hit with the same path, so the two lists never share a
    /// filepath even when the search spans several datasets.
    pub fn merge(metadata: Vec<SearchResult>, content: Vec<SearchResult>) -> Self {
        let mut metadata_results = Vec::with_capacity(metadata.len());
        let mut seen_rows = HashSet::with_capacity(metadata.len());
        let mut metadata_paths = HashSet::with_capacity(metadata.len());
        for result in metadata {
            if seen_rows.insert((result.dataset.clone(), result.filepath.clone())) {
                metadata_paths.insert(result.filepath.clone());
                metadata_results.push(result);
            }
        }

        let total_content_matches = content.len();
        let mut duplicate_paths = HashSet::new();
        let mut content_only_results = Vec::new();
        let mut content_rows = HashSet::new();
        for result in content {
            if metadata_paths.contains(&result.filepath) {
                duplicate_paths.insert(result.filepath);
                continue;
            }
            if content_rows.insert((result.dataset.clone(), result.filepath.clone())) {
                content_only_results.push(result);
            }
        }

        let unique_files = metadata_paths
            .iter()
            .map(String::as_str)
            .chain(content_only_results.iter().map(|r| r.filepath.as_str()))
            .collect::<HashSet<_>>()
            .len();
        let stats = SearchStats {
            total_metadata_matches: metadata_results.len(),
            total_content_matches,
            unique_files,
            duplicates: duplicate_paths.len(),
        };

        Self {
            metadata_results,
            content_only_results,
            stats,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metadata_results.is_empty() && self.content_only_results.is_empty()
    }
}

/// Outcome of a file lookup that may use a wildcard path.
#[derive(Debug, Clone, PartialEq)]
pub enum FileLookup {
    /// Exactly one file matched
    Found(Box<FileDocumentation>),

    /// A wildcard path matched several files; nothing was picked
    Ambiguous(Vec<SearchResult>),

    NotFound,
}

impl FileLookup {
    /// Returns the record when the lookup resolved to a single file.
    pub fn found(self) -> Option<FileDocumentation> {
        match self {
            FileLookup::Found(doc) => Some(*doc),
            _ => None,
        }
    }
}
