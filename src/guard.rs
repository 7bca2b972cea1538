//! Read-only SQL guard.
//!
//! Keyword-based screening of SQL text, used on two independent layers:
//! the intent translator refuses to return a statement that fails it, and
//! the executor checks it again immediately before running anything. The
//! read-only transaction mode underneath (see `executor`) is the final
//! backstop if a crafted statement slips past the text check.

/// Statement keywords that disqualify a query, matched as whole words
/// anywhere in the text. Scanning the whole statement rather than the first
/// token catches writes hidden inside common-table-expressions.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE",
    "GRANT", "REVOKE", "EXEC", "EXECUTE", "CALL", "MERGE", "REPLACE",
    "RENAME", "SET", "COPY",
];

/// Whether `sql` is a single read-only statement.
///
/// Requires the trimmed text to start with `SELECT` or `WITH`, rejects any
/// write keyword as a whole word anywhere, and rejects semicolon-stacked
/// statements outright (one trailing semicolon is tolerated).
pub fn is_read_only_query(sql: &str) -> bool {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return false;
    }

    let upper = trimmed.to_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return false;
    }

    // No statement stacking, even if every piece looks like a SELECT.
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
    if body.contains(';') {
        return false;
    }

    // Comment tokens can hide trailing text from this scan and from any
    // later consumer that wraps or appends to the statement (a trailing
    // `--` would comment out an appended LIMIT clause), so they disqualify
    // the statement outright.
    if trimmed.contains("--") || trimmed.contains("/*") {
        return false;
    }

    !contains_write_keyword(&upper)
}

fn contains_write_keyword(upper_sql: &str) -> bool {
    upper_sql
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|token| WRITE_KEYWORDS.contains(&token))
}
