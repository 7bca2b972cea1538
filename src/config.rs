//! Engine configuration.
//!
//! Loaded from `<config dir>/pgsearch/config.toml`; passwords and API keys
//! are never written back to disk and can be supplied through `PGPASSWORD`
//! and `OPENAI_API_KEY`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 5432,
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: String::new(),
        }
    }
}

fn default_llm_base_url() -> String {
    String::from("https://api.openai.com/v1")
}

fn default_llm_model() -> String {
    String::from("gpt-4o-mini")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub main: ConnectionConfig,
    /// Optional replica target; falls back to `main` when absent.
    #[serde(default)]
    pub readonly: Option<ConnectionConfig>,
    /// Bounded pool size shared across requests. Exhaustion surfaces as a
    /// timeout, never an unbounded queue.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// How long a request may wait for a pooled connection.
    #[serde(default = "default_pool_wait_ms")]
    pub pool_wait_ms: u64,
    /// Statement-level timeout applied inside every read-only transaction.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    /// Age after which a cached schema snapshot is considered stale.
    #[serde(default = "default_schema_ttl_secs")]
    pub schema_cache_ttl_secs: u64,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
}

fn default_pool_size() -> usize {
    5
}

fn default_pool_wait_ms() -> u64 {
    5_000
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

fn default_schema_ttl_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            main: ConnectionConfig::default(),
            readonly: None,
            pool_size: default_pool_size(),
            pool_wait_ms: default_pool_wait_ms(),
            statement_timeout_ms: default_statement_timeout_ms(),
            schema_cache_ttl_secs: default_schema_ttl_secs(),
            llm: None,
        }
    }
}

impl EngineConfig {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pgsearch")
            .join("config.toml")
    }

    /// Load the config file, then apply environment overrides for secrets.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(password) = std::env::var("PGPASSWORD") {
            self.main.password = password.clone();
            if let Some(readonly) = self.readonly.as_mut() {
                if readonly.password.is_empty() {
                    readonly.password = password;
                }
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.get_or_insert_with(LlmConfig::default).api_key = key;
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    pub fn schema_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_cache_ttl_secs)
    }
}
