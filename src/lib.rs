pub mod config;
pub mod csv;
pub mod db;
pub mod error;
pub mod executor;
pub mod filter;
pub mod guard;
pub mod ident;
pub mod nl;
pub mod schema;

pub use config::EngineConfig;
pub use db::{CellValue, DatabaseTarget, PoolSet};
pub use error::{QueryError, Result};
pub use executor::{QueryExecutor, SearchQuery, SearchResult};
pub use filter::{FilterOperator, SearchFilter};
pub use guard::is_read_only_query;
pub use ident::{is_valid_identifier, quote_identifier};
pub use nl::{InsightGenerator, IntentTranslator, LanguageModel, OpenAiModel, QueryIntent};
pub use schema::{ColumnMetadata, SchemaCatalog, TableMetadata};
