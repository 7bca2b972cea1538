//! Bounded connection pools, one per database target.

use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolError, RecyclingMethod,
    Runtime, Timeouts};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_postgres::NoTls;

use crate::config::{ConnectionConfig, EngineConfig};
use crate::error::{QueryError, Result};

/// Which connection pool a query runs against. `Readonly` points at a
/// replica when one is configured, otherwise it shares the main target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseTarget {
    #[default]
    Main,
    Readonly,
}

impl DatabaseTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "main" => Some(DatabaseTarget::Main),
            "readonly" => Some(DatabaseTarget::Readonly),
            _ => None,
        }
    }
}

impl std::fmt::Display for DatabaseTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseTarget::Main => write!(f, "main"),
            DatabaseTarget::Readonly => write!(f, "readonly"),
        }
    }
}

/// The two bounded pools shared across all requests. Safe for concurrent
/// access; exhaustion surfaces as a timeout error rather than an unbounded
/// queue.
pub struct PoolSet {
    main: Pool,
    readonly: Pool,
}

impl PoolSet {
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let wait = Duration::from_millis(config.pool_wait_ms);
        let main = build_pool(&config.main, config.pool_size, wait)?;
        let readonly = match &config.readonly {
            Some(conn) => build_pool(conn, config.pool_size, wait)?,
            None => main.clone(),
        };
        Ok(Self { main, readonly })
    }

    /// Check out a connection, mapping pool exhaustion to a timeout-flagged
    /// execution error so callers can back off.
    pub async fn client(&self, target: DatabaseTarget) -> Result<Object> {
        let pool = match target {
            DatabaseTarget::Main => &self.main,
            DatabaseTarget::Readonly => &self.readonly,
        };
        pool.get().await.map_err(|err| match err {
            PoolError::Timeout(_) => QueryError::QueryExecutionFailed {
                message: format!("connection pool wait timed out ({target})"),
                timeout: true,
            },
            other => QueryError::QueryExecutionFailed {
                message: format!("failed to acquire connection ({target}): {other}"),
                timeout: false,
            },
        })
    }
}

fn build_pool(conn: &ConnectionConfig, size: usize, wait: Duration) -> anyhow::Result<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(conn.host.clone());
    cfg.port = Some(conn.port);
    cfg.dbname = Some(conn.database.clone());
    cfg.user = Some(conn.username.clone());
    cfg.password = Some(conn.password.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(deadpool_postgres::PoolConfig {
        max_size: size,
        timeouts: Timeouts {
            wait: Some(wait),
            ..Timeouts::default()
        },
        ..Default::default()
    });
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    Ok(pool)
}
