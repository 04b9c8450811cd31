//! FTS5 full-text index definitions and query construction.
//!
//! The index is an external-content FTS5 table over `files`, kept current by
//! three triggers. Metadata searches are restricted to the descriptive
//! columns with an FTS5 column filter; content searches only look at
//! `full_content`.

/// Name of the live full-text table.
pub const FTS_TABLE: &str = "files_fts";

/// Name used while a replacement index is being built.
pub const FTS_REBUILD_TABLE: &str = "files_fts_rebuild";

/// Tokenizer used by databases created before identifier-preserving
/// tokenization existed.
pub const LEGACY_TOKENIZER: &str = "unicode61";

/// Keeps `. _ $ @ - > : #` inside tokens so identifiers such as `my_var`,
/// `obj->method`, `Class::Method` or `$httpClient` stay single tokens.
pub const CURRENT_TOKENIZER: &str = "unicode61 tokenchars '._$@->:#'";

/// Indexed columns, in FTS column order.
pub const FTS_COLUMNS: [&str; 12] = [
    "filepath",
    "filename",
    "overview",
    "ddd_context",
    "functions",
    "exports",
    "imports",
    "types_interfaces_classes",
    "constants",
    "dependencies",
    "other_notes",
    "full_content",
];

/// Position of `full_content` in [`FTS_COLUMNS`], used for snippets.
pub const CONTENT_COLUMN_INDEX: usize = 11;

/// Distance used for the proximity fallback of two-term queries.
const NEAR_DISTANCE: usize = 10;

/// Which half of the index a search scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Everything except `full_content`
    Metadata,
    /// `full_content` only
    Content,
}

impl SearchScope {
    /// FTS5 column filter prefix for this scope.
    fn column_filter(self) -> String {
        match self {
            SearchScope::Metadata => {
                let columns = &FTS_COLUMNS[..CONTENT_COLUMN_INDEX];
                format!("{{{}}}", columns.join(" "))
            }
            SearchScope::Content => FTS_COLUMNS[CONTENT_COLUMN_INDEX].to_string(),
        }
    }

    /// Wraps a match expression so it only applies to this scope's columns.
    pub fn restrict(self, expression: &str) -> String {
        format!("{} : ({})", self.column_filter(), expression)
    }

    /// Column argument for `snippet()`; -1 lets FTS5 pick the best column.
    pub fn snippet_column(self) -> i64 {
        match self {
            SearchScope::Metadata => -1,
            SearchScope::Content => CONTENT_COLUMN_INDEX as i64,
        }
    }
}

/// `CREATE VIRTUAL TABLE` statement for an index named `table` using
/// `tokenizer`.
pub fn create_table_sql(table: &str, tokenizer: &str) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {table} USING fts5({columns}, content='files', content_rowid='id', tokenize=\"{tokenizer}\")",
        columns = FTS_COLUMNS.join(", "),
    )
}

/// Statement that repopulates `table` from `files`.
pub fn rebuild_sql(table: &str) -> String {
    format!("INSERT INTO {table}({table}) VALUES ('rebuild')")
}

pub fn optimize_sql() -> String {
    format!("INSERT INTO {FTS_TABLE}({FTS_TABLE}) VALUES ('optimize')")
}

/// Triggers that keep `files_fts` in step with `files`.
pub fn create_triggers_sql() -> String {
    let columns = FTS_COLUMNS.join(", ");
    let new_values = prefixed("new");
    let old_values = prefixed("old");
    format!(
        "CREATE TRIGGER IF NOT EXISTS files_fts_ai AFTER INSERT ON files BEGIN
            INSERT INTO {FTS_TABLE}(rowid, {columns}) VALUES (new.id, {new_values});
        END;
        CREATE TRIGGER IF NOT EXISTS files_fts_ad AFTER DELETE ON files BEGIN
            INSERT INTO {FTS_TABLE}({FTS_TABLE}, rowid, {columns}) VALUES ('delete', old.id, {old_values});
        END;
        CREATE TRIGGER IF NOT EXISTS files_fts_au AFTER UPDATE ON files BEGIN
            INSERT INTO {FTS_TABLE}({FTS_TABLE}, rowid, {columns}) VALUES ('delete', old.id, {old_values});
            INSERT INTO {FTS_TABLE}(rowid, {columns}) VALUES (new.id, {new_values});
        END;"
    )
}

pub const DROP_TRIGGERS_SQL: &str = "DROP TRIGGER IF EXISTS files_fts_ai;
     DROP TRIGGER IF EXISTS files_fts_ad;
     DROP TRIGGER IF EXISTS files_fts_au;";

fn prefixed(alias: &str) -> String {
    FTS_COLUMNS
        .iter()
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Turns a free-form query into an FTS5 match expression.
///
/// - one term: prefix match, `"term"*`
/// - two terms: exact phrase, else both terms near each other
/// - three or more: exact phrase, else every term anywhere
///
/// Queries that already use FTS5 syntax (`AND`, `OR`, `NOT`, `NEAR(` or a
/// double quote) are passed through. An unbalanced quote would make FTS5
/// reject the query, so in that case the whole input becomes one literal
/// phrase. Returns `None` for blank input.
pub fn build_match_query(query: &str) -> Option<String> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    if uses_advanced_syntax(query) {
        if query.matches('"').count() % 2 == 0 {
            return Some(query.to_string());
        }
        return Some(quote(query));
    }

    let terms: Vec<&str> = query
        .split_whitespace()
        .map(|term| term.trim_end_matches('*'))
        .filter(|term| !term.is_empty())
        .collect();

    match terms.as_slice() {
        [] => None,
        [term] => Some(format!("{}*", quote(term))),
        [first, second] => Some(format!(
            "{} OR NEAR({} {}, {NEAR_DISTANCE})",
            quote(&terms.join(" ")),
            quote(first),
            quote(second)
        )),
        _ => {
            let all_terms = terms.iter().map(|t| quote(t)).collect::<Vec<_>>();
            Some(format!(
                "{} OR ({})",
                quote(&terms.join(" ")),
                all_terms.join(" AND ")
            ))
        }
    }
}

fn uses_advanced_syntax(query: &str) -> bool {
    query.contains('"')
        || query.contains("NEAR(")
        || query
            .split_whitespace()
            .any(|word| matches!(word, "AND" | "OR" | "NOT"))
}

/// Wraps `text` in double quotes, doubling any quote inside it.
fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_term_gets_prefix_wildcard() {
        assert_eq!(build_match_query("parse").as_deref(), Some("\"parse\"*"));
        assert_eq!(build_match_query("  parse*  ").as_deref(), Some("\"parse\"*"));
        assert_eq!(
            build_match_query("obj->method").as_deref(),
            Some("\"obj->method\"*")
        );
    }

    #[test]
    fn test_two_terms_use_phrase_or_proximity() {
        assert_eq!(
            build_match_query("entry point").as_deref(),
            Some("\"entry point\" OR NEAR(\"entry\" \"point\", 10)")
        );
    }

    #[test]
    fn test_three_terms_use_phrase_or_conjunction() {
        assert_eq!(
            build_match_query("open the pool").as_deref(),
            Some("\"open the pool\" OR (\"open\" AND \"the\" AND \"pool\")")
        );
    }

    #[test]
    fn test_advanced_syntax_passes_through() {
        assert_eq!(
            build_match_query("pool AND NOT timeout").as_deref(),
            Some("pool AND NOT timeout")
        );
        assert_eq!(
            build_match_query("\"connection pool\"").as_deref(),
            Some("\"connection pool\"")
        );
        assert_eq!(
            build_match_query("NEAR(pool timeout, 3)").as_deref(),
            Some("NEAR(pool timeout, 3)")
        );
    }

    #[test]
    fn test_unbalanced_quote_becomes_literal_phrase() {
        assert_eq!(
            build_match_query("say \"hello").as_deref(),
            Some("\"say \"\"hello\"")
        );
    }

    #[test]
    fn test_lowercase_operators_are_plain_terms() {
        assert_eq!(
            build_match_query("and").as_deref(),
            Some("\"and\"*")
        );
    }

    #[test]
    fn test_blank_query_yields_nothing() {
        assert_eq!(build_match_query(""), None);
        assert_eq!(build_match_query("   "), None);
        assert_eq!(build_match_query("* *"), None);
    }

    #[test]
    fn test_scope_restriction() {
        let restricted = SearchScope::Content.restrict("\"x\"*");
        assert_eq!(restricted, "full_content : (\"x\"*)");

        let metadata = SearchScope::Metadata.restrict("\"x\"*");
        assert!(metadata.starts_with("{filepath filename overview"));
        assert!(!metadata.contains("full_content"));
    }

    #[test]
    fn test_table_sql_carries_tokenizer() {
        let sql = create_table_sql(FTS_REBUILD_TABLE, CURRENT_TOKENIZER);
        assert!(sql.contains("files_fts_rebuild USING fts5("));
        assert!(sql.contains("tokenchars '._$@->:#'"));
        assert!(sql.contains("content='files'"));
    }
}
