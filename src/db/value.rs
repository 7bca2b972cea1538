//! Typed cell values extracted from PostgreSQL rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::{types::Type, Row};

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
}

impl CellValue {
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int16(i) => i.to_string(),
            CellValue::Int32(i) => i.to_string(),
            CellValue::Int64(i) => i.to_string(),
            CellValue::Float32(f) => f.to_string(),
            CellValue::Float64(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Date(d) => d.to_string(),
            CellValue::Time(t) => t.to_string(),
            CellValue::DateTime(dt) => dt.to_string(),
            CellValue::TimestampTz(dt) => dt.to_rfc3339(),
            CellValue::Json(j) => j.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Int16(i) => serde_json::json!(*i),
            CellValue::Int32(i) => serde_json::json!(*i),
            CellValue::Int64(i) => serde_json::json!(*i),
            CellValue::Float32(f) => serde_json::json!(*f),
            CellValue::Float64(f) => serde_json::json!(*f),
            CellValue::Json(j) => j.clone(),
            other => serde_json::Value::String(other.display()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// Extract column names and typed cells from a result set. Column order is
/// the statement's projection order; an empty result set yields empty
/// columns as well, since there is no row to describe them.
pub fn parse_rows(rows: &[Row]) -> (Vec<String>, Vec<Vec<CellValue>>) {
    let Some(first) = rows.first() else {
        return (Vec::new(), Vec::new());
    };

    let columns: Vec<String> = first
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();

    let parsed = rows
        .iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(i, col)| extract_value(row, i, col.type_()))
                .collect()
        })
        .collect();

    (columns, parsed)
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> CellValue {
    match *pg_type {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int16)
            .unwrap_or(CellValue::Null),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int32)
            .unwrap_or(CellValue::Null),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int64)
            .unwrap_or(CellValue::Null),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float32)
            .unwrap_or(CellValue::Null),
        Type::FLOAT8 | Type::NUMERIC => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float64)
            .unwrap_or(CellValue::Null),
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::CHAR | Type::BPCHAR => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Text)
            .unwrap_or(CellValue::Null),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Time)
            .unwrap_or(CellValue::Null),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Null),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::TimestampTz)
            .unwrap_or(CellValue::Null),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Json)
            .unwrap_or(CellValue::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Text)
            .unwrap_or(CellValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_displays_empty() {
        assert_eq!(CellValue::Null.display(), "");
        assert!(CellValue::Null.is_null());
    }

    #[test]
    fn test_scalar_display() {
        assert_eq!(CellValue::Bool(true).display(), "true");
        assert_eq!(CellValue::Int32(-100).display(), "-100");
        assert_eq!(CellValue::Int64(9_999_999).display(), "9999999");
        assert_eq!(CellValue::Float64(2.5).display(), "2.5");
        assert_eq!(CellValue::Text("hello".into()).display(), "hello");
    }

    #[test]
    fn test_to_json() {
        assert!(CellValue::Null.to_json().is_null());
        assert_eq!(CellValue::Int32(42).to_json(), serde_json::json!(42));
        assert_eq!(CellValue::Bool(false).to_json(), serde_json::json!(false));
        assert_eq!(
            CellValue::Text("x".into()).to_json(),
            serde_json::json!("x")
        );
        let payload = serde_json::json!({"k": "v"});
        assert_eq!(CellValue::Json(payload.clone()).to_json(), payload);
    }

    #[test]
    fn test_date_display() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(CellValue::Date(d).display(), "2024-03-01");
    }
}
