//! CSV and JSON rendering of a result page.
//!
//! RFC-4180-minimal: fields containing comma, double quote, or newline are
//! quoted with internal quotes doubled, nulls render as empty fields, and no
//! line-ending normalization is attempted.

use crate::db::CellValue;
use crate::executor::SearchResult;

/// Render a result set as CSV: header row of column names, then one line
/// per record. An empty result set renders as the empty string.
pub fn to_csv(result: &SearchResult) -> String {
    if result.rows.is_empty() {
        return String::new();
    }

    let mut output = String::new();

    let headers: Vec<String> = result.columns.iter().map(|c| csv_escape(c)).collect();
    output.push_str(&headers.join(","));
    output.push('\n');

    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| csv_escape(&cell_to_csv(cell)))
            .collect();
        output.push_str(&cells.join(","));
        output.push('\n');
    }

    output
}

/// Render the rows as a pretty-printed JSON array of objects.
pub fn to_json(result: &SearchResult) -> String {
    serde_json::to_string_pretty(&result.rows_as_objects())
        .unwrap_or_else(|_| "[]".to_string())
}

fn cell_to_csv(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => String::new(),
        other => other.display(),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
