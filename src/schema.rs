//! Runtime schema introspection with a TTL-bounded snapshot cache.
//!
//! Every identifier the engine later splices into SQL is validated against
//! a snapshot produced here. Snapshots are immutable; a refresh builds a new
//! one and atomically replaces the cached entry for that database target.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::db::{parse_rows, DatabaseTarget, PoolSet};
use crate::error::{QueryError, Result};
use crate::ident::{is_valid_identifier, quote_identifier};

/// Column name fragments whose sampled values must never be exposed through
/// metadata.
const SENSITIVE_NAME_FRAGMENTS: &[&str] = &["encrypted", "password", "token"];

const SAMPLE_LIMIT: i64 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct ColumnMetadata {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default_value: Option<String>,
    pub max_length: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableMetadata {
    pub table_name: String,
    pub columns: Vec<ColumnMetadata>,
    pub record_count: i64,
    /// Up to 20 distinct non-null values per sampleable column. Columns that
    /// are non-textual/non-integer/non-boolean, sensitively named, or whose
    /// sampling failed are simply absent.
    pub sample_values: HashMap<String, Vec<serde_json::Value>>,
}

impl TableMetadata {
    pub fn column_names(&self) -> std::collections::HashSet<String> {
        self.columns
            .iter()
            .map(|c| c.column_name.clone())
            .collect()
    }
}

/// Injectable time source so cache expiry is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct Snapshot {
    taken_at: Instant,
    tables: Arc<Vec<TableMetadata>>,
}

/// Process-wide schema cache, safe for concurrent read access. Entries older
/// than the TTL are silently refreshed on next access; a refresh failure is
/// a `SchemaUnavailable` error, never a fall-back to the stale entry.
pub struct SchemaCatalog {
    pools: Arc<PoolSet>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cache: RwLock<HashMap<DatabaseTarget, Snapshot>>,
}

impl SchemaCatalog {
    pub fn new(pools: Arc<PoolSet>, ttl: Duration) -> Self {
        Self::with_clock(pools, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(pools: Arc<PoolSet>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            pools,
            clock,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Names of all base tables in the target database, ordered by name.
    pub async fn tables(&self, target: DatabaseTarget) -> Result<Vec<String>> {
        let snapshot = self.snapshot(target).await?;
        Ok(snapshot.iter().map(|t| t.table_name.clone()).collect())
    }

    /// Metadata for one table, from the current snapshot. A name not present
    /// in the snapshot is an `InvalidTable` error.
    pub async fn table_metadata(
        &self,
        table: &str,
        target: DatabaseTarget,
    ) -> Result<TableMetadata> {
        let snapshot = self.snapshot(target).await?;
        snapshot
            .iter()
            .find(|t| t.table_name == table)
            .cloned()
            .ok_or_else(|| QueryError::InvalidTable(table.to_string()))
    }

    pub async fn all_tables_metadata(
        &self,
        target: DatabaseTarget,
    ) -> Result<Arc<Vec<TableMetadata>>> {
        self.snapshot(target).await
    }

    /// Drop the cached snapshot so the next access re-introspects.
    pub fn invalidate(&self, target: DatabaseTarget) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&target);
        }
    }

    async fn snapshot(&self, target: DatabaseTarget) -> Result<Arc<Vec<TableMetadata>>> {
        if let Some(tables) = self.cached(target) {
            return Ok(tables);
        }

        debug!(%target, "schema cache miss, introspecting");
        let tables = Arc::new(self.introspect(target).await?);
        let snapshot = Snapshot {
            taken_at: self.clock.now(),
            tables: Arc::clone(&tables),
        };
        // Last writer wins; concurrent refreshes produce equivalent
        // snapshots and the replacement is atomic either way.
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(target, snapshot);
        }
        Ok(tables)
    }

    fn cached(&self, target: DatabaseTarget) -> Option<Arc<Vec<TableMetadata>>> {
        let cache = self.cache.read().ok()?;
        let snapshot = cache.get(&target)?;
        if self.clock.now().duration_since(snapshot.taken_at) >= self.ttl {
            return None;
        }
        Some(Arc::clone(&snapshot.tables))
    }

    async fn introspect(&self, target: DatabaseTarget) -> Result<Vec<TableMetadata>> {
        let client = self
            .pools
            .client(target)
            .await
            .map_err(|e| QueryError::SchemaUnavailable(e.to_string()))?;

        let table_rows = client
            .query(
                r#"
                SELECT table_name
                FROM information_schema.tables
                WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
                ORDER BY table_name
                "#,
                &[],
            )
            .await
            .map_err(|e| QueryError::SchemaUnavailable(e.to_string()))?;

        let mut tables = Vec::with_capacity(table_rows.len());
        for row in &table_rows {
            let name: String = row.get("table_name");
            // A table whose name fails our own identifier rules can never be
            // queried through this engine, so it is excluded up front.
            if !is_valid_identifier(&name) {
                warn!(table = %name, "skipping table with unquotable name");
                continue;
            }
            tables.push(self.introspect_table(&client, &name).await?);
        }
        Ok(tables)
    }

    async fn introspect_table(
        &self,
        client: &deadpool_postgres::Object,
        table: &str,
    ) -> Result<TableMetadata> {
        let column_rows = client
            .query(
                r#"
                SELECT
                    column_name,
                    data_type,
                    is_nullable = 'YES' as is_nullable,
                    column_default,
                    character_maximum_length
                FROM information_schema.columns
                WHERE table_schema = 'public' AND table_name = $1
                ORDER BY ordinal_position
                "#,
                &[&table],
            )
            .await
            .map_err(|e| QueryError::SchemaUnavailable(e.to_string()))?;

        let columns: Vec<ColumnMetadata> = column_rows
            .iter()
            .map(|row| ColumnMetadata {
                column_name: row.get("column_name"),
                data_type: row.get("data_type"),
                is_nullable: row.get("is_nullable"),
                default_value: row.get("column_default"),
                max_length: row.get("character_maximum_length"),
            })
            .collect();

        let quoted_table = quote_identifier(table)?;
        let count_row = client
            .query_one(&format!("SELECT COUNT(*) FROM {quoted_table}"), &[])
            .await
            .map_err(|e| QueryError::SchemaUnavailable(e.to_string()))?;
        let record_count: i64 = count_row.get(0);

        let mut sample_values = HashMap::new();
        for column in &columns {
            if !should_sample(column) {
                continue;
            }
            // Sampling is best-effort: a failure on one column must never
            // abort metadata retrieval for the table.
            match self.sample_column(client, &quoted_table, &column.column_name).await {
                Ok(values) if !values.is_empty() => {
                    sample_values.insert(column.column_name.clone(), values);
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(table, column = %column.column_name, %err, "column sampling failed");
                }
            }
        }

        Ok(TableMetadata {
            table_name: table.to_string(),
            columns,
            record_count,
            sample_values,
        })
    }

    async fn sample_column(
        &self,
        client: &deadpool_postgres::Object,
        quoted_table: &str,
        column: &str,
    ) -> Result<Vec<serde_json::Value>> {
        let quoted_column = quote_identifier(column)?;
        let sql = format!(
            "SELECT DISTINCT {quoted_column} FROM {quoted_table} \
             WHERE {quoted_column} IS NOT NULL LIMIT {SAMPLE_LIMIT}"
        );
        let rows = client.query(&sql, &[]).await.map_err(QueryError::from_pg)?;
        let (_, cells) = parse_rows(&rows);
        Ok(cells
            .into_iter()
            .filter_map(|mut row| row.pop())
            .map(|cell| cell.to_json())
            .collect())
    }
}

#[cfg(test)]
impl SchemaCatalog {
    /// Seed the cache directly so translator and executor tests can run
    /// without a live database.
    pub(crate) fn prime(&self, target: DatabaseTarget, tables: Vec<TableMetadata>) {
        let snapshot = Snapshot {
            taken_at: self.clock.now(),
            tables: Arc::new(tables),
        };
        self.cache.write().unwrap().insert(target, snapshot);
    }
}

/// Only textual, integer, and boolean columns are sampled, and never a
/// column whose name hints at sensitive content.
fn should_sample(column: &ColumnMetadata) -> bool {
    let name = column.column_name.to_lowercase();
    if SENSITIVE_NAME_FRAGMENTS
        .iter()
        .any(|fragment| name.contains(fragment))
    {
        return false;
    }
    let data_type = column.data_type.to_lowercase();
    data_type == "text"
        || data_type.contains("char")
        || data_type.contains("int")
        || data_type == "boolean"
}
