//! Identifier validation and quoting.
//!
//! Identifiers (table and column names) cannot be sent as bind parameters,
//! so every one spliced into SQL text must first pass this allow-list. The
//! rules are deliberately stricter than PostgreSQL's own identifier grammar:
//! ASCII letters, digits, underscore and hyphen only, starting with a letter
//! or underscore, and never a bare SQL keyword. Flexibility is traded for an
//! unambiguous, auditable check.

use crate::error::{QueryError, Result};

/// Keywords that are never acceptable as a bare identifier, even though some
/// of them would pass the character check.
const RESERVED_WORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "create", "alter",
    "truncate", "grant", "revoke", "exec", "execute", "call", "merge",
    "replace", "rename", "set", "copy", "from", "where", "join", "union",
    "table", "order", "group", "having", "limit", "offset", "and", "or",
    "not", "null", "into", "values", "returning",
];

/// Whether `name` is safe to embed in SQL text as a table or column name.
///
/// Stateless and safe to call concurrently from any number of requests.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return false;
    }
    !RESERVED_WORDS
        .iter()
        .any(|word| name.eq_ignore_ascii_case(word))
}

/// Double-quote an identifier for splicing into SQL text.
///
/// Re-validates on every call: a value validated at one call site is never
/// trusted at another. An invalid name is a hard failure, not an escaping
/// problem, so no internal escaping is attempted.
pub fn quote_identifier(name: &str) -> Result<String> {
    if !is_valid_identifier(name) {
        return Err(QueryError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}
