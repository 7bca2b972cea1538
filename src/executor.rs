//! Query building and execution.
//!
//! Two layers of write protection apply here. The text of a translated
//! statement must pass the read-only guard, and every statement then runs
//! inside an explicitly read-only transaction, so a write that somehow
//! survived the text check is still refused by the database engine itself.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{parse_rows, CellValue, DatabaseTarget, PoolSet};
use crate::error::{QueryError, Result};
use crate::filter::{compile, SearchFilter};
use crate::guard::is_read_only_query;
use crate::ident::{is_valid_identifier, quote_identifier};
use crate::schema::SchemaCatalog;

/// Hard ceiling on a single page, regardless of what the caller asked for.
const MAX_PAGE_SIZE: u32 = 1_000;

/// A CSV export fetches at most this many rows in one call. Larger tables
/// are exported by the caller's own repeated calls, never auto-chunked here.
const EXPORT_PAGE_SIZE: u32 = 10_000;

/// Row cap applied when executing translated natural-language SQL.
const TRANSLATED_ROW_CAP: u32 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub table: String,
    #[serde(default)]
    pub filters: Vec<SearchFilter>,
    #[serde(default, rename = "sortBy", skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(default, rename = "sortOrder", skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size", rename = "pageSize")]
    pub page_size: u32,
    #[serde(default)]
    pub database: DatabaseTarget,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

/// One page of results. Ephemeral; constructed per request.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub columns: Vec<String>,
    #[serde(serialize_with = "serialize_rows")]
    pub rows: Vec<Vec<CellValue>>,
    #[serde(rename = "totalCount")]
    pub total_count: i64,
    pub page: u32,
    #[serde(rename = "pageSize")]
    pub page_size: u32,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
}

fn serialize_rows<S: serde::Serializer>(
    rows: &[Vec<CellValue>],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(rows.len()))?;
    for row in rows {
        let cells: Vec<serde_json::Value> = row.iter().map(CellValue::to_json).collect();
        seq.serialize_element(&cells)?;
    }
    seq.end()
}

impl SearchResult {
    /// Rows as JSON objects keyed by column name.
    pub fn rows_as_objects(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                for (name, cell) in self.columns.iter().zip(row) {
                    object.insert(name.clone(), cell.to_json());
                }
                serde_json::Value::Object(object)
            })
            .collect()
    }
}

/// Hook for aborting an in-flight statement on the server.
trait CancelStatement: Send + 'static {
    fn cancel(self);
}

impl CancelStatement for tokio_postgres::CancelToken {
    fn cancel(self) {
        // The pools connect without TLS, so the cancel request does too.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = self.cancel_query(tokio_postgres::NoTls).await;
            });
        }
    }
}

/// Fires its cancel hook on drop unless disarmed first. Held across the
/// statement phase of a request so that a caller dropping the future
/// aborts the statement server-side instead of leaving the database to run
/// it to completion; the statement timeout remains the fallback bound.
struct CancelOnDrop<C: CancelStatement> {
    hook: Option<C>,
}

impl<C: CancelStatement> CancelOnDrop<C> {
    fn new(hook: C) -> Self {
        Self { hook: Some(hook) }
    }

    fn disarm(&mut self) {
        self.hook = None;
    }
}

impl<C: CancelStatement> Drop for CancelOnDrop<C> {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook.cancel();
        }
    }
}

pub struct QueryExecutor {
    pools: Arc<PoolSet>,
    catalog: Arc<SchemaCatalog>,
    statement_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(pools: Arc<PoolSet>, catalog: Arc<SchemaCatalog>, statement_timeout: Duration) -> Self {
        Self {
            pools,
            catalog,
            statement_timeout,
        }
    }

    /// Run a structured search: validate every identifier against the live
    /// schema snapshot, compile the filters, then issue a COUNT and a page
    /// SELECT inside one read-only transaction.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        self.run_search(query, MAX_PAGE_SIZE).await
    }

    /// Export one bounded batch of matching rows as CSV.
    pub async fn export_to_csv(&self, query: &SearchQuery) -> Result<String> {
        let mut export_query = query.clone();
        export_query.page = 1;
        export_query.page_size = EXPORT_PAGE_SIZE;
        let result = self.run_search(&export_query, EXPORT_PAGE_SIZE).await?;
        Ok(crate::csv::to_csv(&result))
    }

    /// Execute an already-translated statement from the natural-language
    /// path. The read-only guard is re-checked here, immediately before
    /// execution; nothing from the translation step is trusted across the
    /// call boundary.
    pub async fn execute_readonly(
        &self,
        sql: &str,
        target: DatabaseTarget,
    ) -> Result<SearchResult> {
        if !is_read_only_query(sql) {
            return Err(QueryError::UnsafeQuery);
        }
        let bounded = format!(
            "SELECT * FROM ({}) AS bounded LIMIT {TRANSLATED_ROW_CAP}",
            sql.trim().trim_end_matches(';')
        );

        let mut client = self.pools.client(target).await?;
        let mut cancel_guard = CancelOnDrop::new(client.cancel_token());
        let txn = client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(QueryError::from_pg)?;

        let outcome = async {
            txn.batch_execute(&self.timeout_statement()).await?;
            txn.query(&bounded, &[]).await
        }
        .await;
        cancel_guard.disarm();

        match outcome {
            Ok(rows) => {
                txn.commit().await.map_err(QueryError::from_pg)?;
                let (columns, rows) = parse_rows(&rows);
                let total = rows.len() as i64;
                Ok(SearchResult {
                    columns,
                    rows,
                    total_count: total,
                    page: 1,
                    page_size: TRANSLATED_ROW_CAP,
                    total_pages: total_pages(total, TRANSLATED_ROW_CAP),
                })
            }
            Err(err) => {
                let _ = txn.rollback().await;
                Err(QueryError::from_pg(err))
            }
        }
    }

    async fn run_search(&self, query: &SearchQuery, max_page_size: u32) -> Result<SearchResult> {
        // Table name: both identifier-valid and present in the snapshot.
        if !is_valid_identifier(&query.table) {
            return Err(QueryError::InvalidTable(query.table.clone()));
        }
        let metadata = self
            .catalog
            .table_metadata(&query.table, query.database)
            .await?;
        let valid_columns = metadata.column_names();

        let order_clause = build_order_clause(query, &valid_columns)?;
        let compiled = compile(&query.filters, &valid_columns)?;

        let page = query.page.max(1);
        let page_size = query.page_size.clamp(1, max_page_size);
        let offset = (page as i64 - 1) * page_size as i64;

        // Identifiers are re-validated at the splice point, never trusted
        // from earlier in the call.
        let quoted_table = quote_identifier(&query.table)?;
        let where_clause = if compiled.clause.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", compiled.clause)
        };
        let count_sql = format!("SELECT COUNT(*) FROM {quoted_table}{where_clause}");
        let data_sql = format!(
            "SELECT * FROM {quoted_table}{where_clause}{order_clause} \
             LIMIT {page_size} OFFSET {offset}"
        );
        debug!(table = %query.table, %count_sql, %data_sql, "executing search");

        let params = compiled.params();
        let mut client = self.pools.client(query.database).await?;
        let mut cancel_guard = CancelOnDrop::new(client.cancel_token());
        let txn = client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(QueryError::from_pg)?;

        let outcome = async {
            txn.batch_execute(&self.timeout_statement()).await?;
            let count_row = txn.query_one(&count_sql, &params).await?;
            let data_rows = txn.query(&data_sql, &params).await?;
            Ok::<_, tokio_postgres::Error>((count_row, data_rows))
        }
        .await;
        cancel_guard.disarm();

        match outcome {
            Ok((count_row, data_rows)) => {
                txn.commit().await.map_err(QueryError::from_pg)?;
                let total_count: i64 = count_row.get(0);
                let (columns, rows) = parse_rows(&data_rows);
                Ok(SearchResult {
                    columns,
                    rows,
                    total_count,
                    page,
                    page_size,
                    total_pages: total_pages(total_count, page_size),
                })
            }
            Err(err) => {
                let _ = txn.rollback().await;
                Err(QueryError::from_pg(err))
            }
        }
    }

    fn timeout_statement(&self) -> String {
        format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        )
    }
}

fn build_order_clause(
    query: &SearchQuery,
    valid_columns: &std::collections::HashSet<String>,
) -> Result<String> {
    // Direction is validated even when no sort column was given; a bad
    // value is a client error either way.
    let direction = match query.sort_order.as_deref() {
        None => "ASC",
        Some(order) if order.eq_ignore_ascii_case("asc") => "ASC",
        Some(order) if order.eq_ignore_ascii_case("desc") => "DESC",
        Some(other) => return Err(QueryError::InvalidSortOrder(other.to_string())),
    };
    let Some(sort_by) = query.sort_by.as_deref() else {
        return Ok(String::new());
    };
    if !valid_columns.contains(sort_by) {
        return Err(QueryError::InvalidColumn(sort_by.to_string()));
    }
    let quoted = quote_identifier(sort_by)?;
    Ok(format!(" ORDER BY {quoted} {direction}"))
}

fn total_pages(total_count: i64, page_size: u32) -> u32 {
    if total_count <= 0 {
        return 0;
    }
    let pages = (total_count - 1) / page_size as i64 + 1;
    u32::try_from(pages).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn query(table: &str) -> SearchQuery {
        SearchQuery {
            table: table.to_string(),
            filters: Vec::new(),
            sort_by: None,
            sort_order: None,
            page: 1,
            page_size: 50,
            database: DatabaseTarget::Main,
        }
    }

    fn columns(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_total_pages_is_ceiling() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(50_000, 10_000), 5);
        assert_eq!(total_pages(50_001, 10_000), 6);
    }

    #[test]
    fn test_total_pages_saturates_instead_of_truncating() {
        assert_eq!(total_pages(i64::MAX, 1), u32::MAX);
        assert_eq!(total_pages(u32::MAX as i64 + 1, 1), u32::MAX);
        assert_eq!(total_pages(-5, 10), 0);
    }

    #[test]
    fn test_order_clause_requires_known_column() {
        let mut q = query("contacts");
        q.sort_by = Some("score".to_string());
        q.sort_order = Some("desc".to_string());
        let clause = build_order_clause(&q, &columns(&["name", "score"])).unwrap();
        assert_eq!(clause, " ORDER BY \"score\" DESC");

        q.sort_by = Some("missing".to_string());
        let err = build_order_clause(&q, &columns(&["name", "score"])).unwrap_err();
        assert!(matches!(err, QueryError::InvalidColumn(_)));
    }

    #[test]
    fn test_order_clause_rejects_bad_direction() {
        let mut q = query("contacts");
        q.sort_by = Some("score".to_string());
        q.sort_order = Some("sideways".to_string());
        let err = build_order_clause(&q, &columns(&["score"])).unwrap_err();
        assert!(matches!(err, QueryError::InvalidSortOrder(s) if s == "sideways"));
    }

    #[test]
    fn test_order_clause_defaults_ascending() {
        let mut q = query("contacts");
        q.sort_by = Some("name".to_string());
        let clause = build_order_clause(&q, &columns(&["name"])).unwrap();
        assert_eq!(clause, " ORDER BY \"name\" ASC");
    }

    #[test]
    fn test_search_query_wire_shape() {
        let q: SearchQuery = serde_json::from_str(
            r#"{
                "table": "contacts",
                "filters": [
                    {"column": "score", "operator": "greater_or_equal", "value": 70}
                ],
                "sortBy": "score",
                "sortOrder": "desc",
                "page": 1,
                "pageSize": 10,
                "database": "readonly"
            }"#,
        )
        .unwrap();
        assert_eq!(q.table, "contacts");
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.sort_by.as_deref(), Some("score"));
        assert_eq!(q.database, DatabaseTarget::Readonly);
    }

    #[test]
    fn test_search_query_defaults() {
        let q: SearchQuery = serde_json::from_str(r#"{"table": "contacts"}"#).unwrap();
        assert_eq!(q.page, 1);
        assert_eq!(q.page_size, 50);
        assert_eq!(q.database, DatabaseTarget::Main);
        assert!(q.filters.is_empty());
    }

    #[test]
    fn test_cancel_guard_fires_only_while_armed() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct Flag(Arc<AtomicBool>);
        impl CancelStatement for Flag {
            fn cancel(self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        // Dropped mid-flight: the hook fires.
        let fired = Arc::new(AtomicBool::new(false));
        drop(CancelOnDrop::new(Flag(Arc::clone(&fired))));
        assert!(fired.load(Ordering::SeqCst));

        // Statements completed first: disarm suppresses the hook.
        let fired = Arc::new(AtomicBool::new(false));
        let mut guard = CancelOnDrop::new(Flag(Arc::clone(&fired)));
        guard.disarm();
        drop(guard);
        assert!(!fired.load(Ordering::SeqCst));
    }

    fn executor() -> QueryExecutor {
        let config = crate::config::EngineConfig::default();
        let pools = Arc::new(PoolSet::from_config(&config).unwrap());
        let catalog = Arc::new(crate::schema::SchemaCatalog::new(
            Arc::clone(&pools),
            Duration::from_secs(300),
        ));
        QueryExecutor::new(pools, catalog, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_execute_readonly_rejects_wrapper_escape() {
        // `SELECT 1) AS x --` would close the bounding subquery itself and
        // comment out the appended row cap; the guard must refuse it before
        // any statement is built.
        let err = executor()
            .execute_readonly("SELECT 1) AS x --", DatabaseTarget::Main)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsafeQuery));
    }

    #[tokio::test]
    async fn test_execute_readonly_rejects_writes() {
        let err = executor()
            .execute_readonly("DELETE FROM contacts", DatabaseTarget::Main)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsafeQuery));
    }

    #[test]
    fn test_rows_as_objects_preserves_column_order() {
        let result = SearchResult {
            columns: vec!["name".into(), "score".into()],
            rows: vec![vec![CellValue::Text("Alice".into()), CellValue::Int32(90)]],
            total_count: 1,
            page: 1,
            page_size: 10,
            total_pages: 1,
        };
        let objects = result.rows_as_objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["name"], "Alice");
        assert_eq!(objects[0]["score"], 90);
    }
}
