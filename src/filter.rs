//! Structured-filter to parameterized-WHERE compiler.
//!
//! Every column is checked against the live column set for the target table
//! before any SQL text is produced; values always travel as bind parameters,
//! never as interpolated text. Placeholders carry an explicit cast
//! (`$1::int8`, `$2::text`, ...) so the server never has to guess a
//! parameter type from context.
//!
//! Known limitation: filters combine with `AND` only. There is no `OR` and
//! no nested grouping; that is a deliberate simplicity boundary of this
//! engine, not an oversight.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio_postgres::types::ToSql;

use crate::error::{QueryError, Result};
use crate::ident::quote_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    IsNull,
    IsNotNull,
    In,
    NotIn,
    Between,
}

/// One condition against a single column.
///
/// `value` is required for every operator except `is_null`/`is_not_null`;
/// `between` additionally requires `value2`. A missing bound is a loud
/// validation failure, never a silently mis-compiled condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFilter {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<serde_json::Value>,
}

/// A bind parameter with a concrete wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl BindValue {
    fn from_json(column: &str, value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(BindValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(BindValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(BindValue::Float(f))
                } else {
                    Err(QueryError::InvalidFilter {
                        column: column.to_string(),
                        reason: format!("unrepresentable number {n}"),
                    })
                }
            }
            serde_json::Value::String(s) => Ok(BindValue::Text(s.clone())),
            other => Err(QueryError::InvalidFilter {
                column: column.to_string(),
                reason: format!("unsupported value type: {other}"),
            }),
        }
    }

    /// The cast suffix appended to this value's placeholder.
    fn cast(&self) -> &'static str {
        match self {
            BindValue::Bool(_) => "::bool",
            BindValue::Int(_) => "::int8",
            BindValue::Float(_) => "::float8",
            BindValue::Text(_) => "::text",
        }
    }

    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            BindValue::Bool(b) => b,
            BindValue::Int(i) => i,
            BindValue::Float(f) => f,
            BindValue::Text(s) => s,
        }
    }
}

/// Compiled WHERE clause plus its bind parameters in placeholder order.
///
/// `clause` is the empty string when no conditions were produced; the caller
/// omits the `WHERE` keyword entirely in that case.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    pub clause: String,
    pub binds: Vec<BindValue>,
}

impl CompiledFilter {
    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.binds.iter().map(BindValue::as_sql).collect()
    }
}

/// Compile `filters` into one AND-combined parameterized clause.
///
/// A column not present in `valid_columns` is an immediate `InvalidColumn`
/// error, not a silently dropped condition.
pub fn compile(
    filters: &[SearchFilter],
    valid_columns: &HashSet<String>,
) -> Result<CompiledFilter> {
    let mut parts: Vec<String> = Vec::with_capacity(filters.len());
    let mut binds: Vec<BindValue> = Vec::new();

    for filter in filters {
        if !valid_columns.contains(&filter.column) {
            return Err(QueryError::InvalidColumn(filter.column.clone()));
        }
        let col = quote_identifier(&filter.column)?;

        match filter.operator {
            FilterOperator::Equals
            | FilterOperator::NotEquals
            | FilterOperator::GreaterThan
            | FilterOperator::LessThan
            | FilterOperator::GreaterOrEqual
            | FilterOperator::LessOrEqual => {
                let bind = BindValue::from_json(&filter.column, required_value(filter)?)?;
                let op = match filter.operator {
                    FilterOperator::Equals => "=",
                    FilterOperator::NotEquals => "<>",
                    FilterOperator::GreaterThan => ">",
                    FilterOperator::LessThan => "<",
                    FilterOperator::GreaterOrEqual => ">=",
                    FilterOperator::LessOrEqual => "<=",
                    _ => unreachable!(),
                };
                let cast = bind.cast();
                binds.push(bind);
                parts.push(format!("{col} {op} ${}{cast}", binds.len()));
            }

            FilterOperator::Contains
            | FilterOperator::NotContains
            | FilterOperator::StartsWith
            | FilterOperator::EndsWith => {
                let text = escape_like(&text_value(filter)?);
                let pattern = match filter.operator {
                    FilterOperator::Contains | FilterOperator::NotContains => {
                        format!("%{text}%")
                    }
                    FilterOperator::StartsWith => format!("{text}%"),
                    FilterOperator::EndsWith => format!("%{text}"),
                    _ => unreachable!(),
                };
                let op = if filter.operator == FilterOperator::NotContains {
                    "NOT ILIKE"
                } else {
                    "ILIKE"
                };
                binds.push(BindValue::Text(pattern));
                // Cast the column to text so substring matching works on any
                // column type, case-insensitively.
                parts.push(format!("{col}::text {op} ${}::text", binds.len()));
            }

            FilterOperator::IsNull => parts.push(format!("{col} IS NULL")),
            FilterOperator::IsNotNull => parts.push(format!("{col} IS NOT NULL")),

            FilterOperator::In | FilterOperator::NotIn => {
                let items = array_value(filter)?;
                // An empty list produces no condition at all; `IN ()` is not
                // valid SQL.
                if items.is_empty() {
                    continue;
                }
                let mut placeholders = Vec::with_capacity(items.len());
                for item in &items {
                    let bind = BindValue::from_json(&filter.column, item)?;
                    let cast = bind.cast();
                    binds.push(bind);
                    placeholders.push(format!("${}{cast}", binds.len()));
                }
                let op = if filter.operator == FilterOperator::NotIn {
                    "NOT IN"
                } else {
                    "IN"
                };
                parts.push(format!("{col} {op} ({})", placeholders.join(", ")));
            }

            FilterOperator::Between => {
                let low = BindValue::from_json(&filter.column, required_value(filter)?)?;
                let high = BindValue::from_json(
                    &filter.column,
                    filter.value2.as_ref().ok_or_else(|| QueryError::InvalidFilter {
                        column: filter.column.clone(),
                        reason: "between requires value2".to_string(),
                    })?,
                )?;
                let (low_cast, high_cast) = (low.cast(), high.cast());
                binds.push(low);
                let low_n = binds.len();
                binds.push(high);
                let high_n = binds.len();
                parts.push(format!(
                    "{col} BETWEEN ${low_n}{low_cast} AND ${high_n}{high_cast}"
                ));
            }
        }
    }

    Ok(CompiledFilter {
        clause: parts.join(" AND "),
        binds,
    })
}

/// Escape LIKE metacharacters so a user value such as `100%` matches
/// literally instead of acting as a pattern. Backslash is the default
/// escape character for ILIKE, so only the value needs rewriting.
fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn required_value(filter: &SearchFilter) -> Result<&serde_json::Value> {
    filter.value.as_ref().ok_or_else(|| QueryError::InvalidFilter {
        column: filter.column.clone(),
        reason: format!("operator {:?} requires a value", filter.operator),
    })
}

fn text_value(filter: &SearchFilter) -> Result<String> {
    match required_value(filter)? {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(QueryError::InvalidFilter {
            column: filter.column.clone(),
            reason: format!("text operator cannot match against {other}"),
        }),
    }
}

fn array_value(filter: &SearchFilter) -> Result<Vec<serde_json::Value>> {
    match required_value(filter)? {
        serde_json::Value::Array(items) => Ok(items.clone()),
        other => Err(QueryError::InvalidFilter {
            column: filter.column.clone(),
            reason: format!("operator {:?} requires an array, got {other}", filter.operator),
        }),
    }
}
