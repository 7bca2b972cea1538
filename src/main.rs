use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use pgsearch::{
    csv, DatabaseTarget, EngineConfig, InsightGenerator, IntentTranslator, OpenAiModel, PoolSet,
    QueryExecutor, SchemaCatalog, SearchQuery,
};

/// Schema-validated search and NL-to-SQL query engine for PostgreSQL
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the base tables visible to the engine
    Tables {
        #[arg(long, default_value = "main")]
        database: String,
    },
    /// Show columns, row count, and sampled values for one table
    Describe {
        table: String,
        #[arg(long, default_value = "main")]
        database: String,
    },
    /// Run a structured search from a JSON SearchQuery
    Search {
        /// JSON query text; reads stdin when omitted
        #[arg(long)]
        query: Option<String>,
    },
    /// Export a structured search as CSV
    Export {
        #[arg(long)]
        query: Option<String>,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Translate a natural-language question, optionally executing it
    Ask {
        question: String,
        #[arg(long, default_value = "readonly")]
        database: String,
        /// Execute the translated statement and print the rows
        #[arg(long)]
        execute: bool,
        /// Also print a natural-language summary of the rows
        #[arg(long)]
        insight: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = EngineConfig::load()?;
    let pools = Arc::new(PoolSet::from_config(&config)?);
    let catalog = Arc::new(SchemaCatalog::new(
        Arc::clone(&pools),
        config.schema_cache_ttl(),
    ));
    let executor = QueryExecutor::new(
        Arc::clone(&pools),
        Arc::clone(&catalog),
        config.statement_timeout(),
    );

    match cli.command {
        Command::Tables { database } => {
            let target = parse_target(&database)?;
            for table in catalog.tables(target).await? {
                println!("{table}");
            }
        }

        Command::Describe { table, database } => {
            let target = parse_target(&database)?;
            let metadata = catalog.table_metadata(&table, target).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }

        Command::Search { query } => {
            let query = read_query(query)?;
            let result = executor.search(&query).await?;
            println!("{}", csv::to_json(&result));
            eprintln!(
                "page {}/{} ({} rows total)",
                result.page, result.total_pages, result.total_count
            );
        }

        Command::Export { query, output } => {
            let query = read_query(query)?;
            let text = executor.export_to_csv(&query).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &text)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("wrote {}", path.display());
                }
                None => print!("{text}"),
            }
        }

        Command::Ask {
            question,
            database,
            execute,
            insight,
        } => {
            let target = parse_target(&database)?;
            let llm_config = config
                .llm
                .clone()
                .context("no [llm] section configured and OPENAI_API_KEY not set")?;
            let model: Arc<dyn pgsearch::LanguageModel> = Arc::new(OpenAiModel::new(&llm_config));
            let translator = IntentTranslator::new(Arc::clone(&catalog), Arc::clone(&model));

            let intent = translator.translate(&question, target).await?;
            if intent.is_ambiguous {
                println!("That request is ambiguous: {}", intent.user_friendly_intent);
                for q in &intent.clarifying_questions {
                    println!("  - {q}");
                }
                return Ok(());
            }

            println!("Understood as: {}", intent.user_friendly_intent);
            let sql = intent
                .suggested_sql
                .as_deref()
                .context("translator returned no SQL")?;
            println!("SQL: {sql}");

            if execute {
                let result = executor.execute_readonly(sql, target).await?;
                println!("{}", csv::to_json(&result));
                if insight {
                    let generator = InsightGenerator::new(model);
                    println!("\n{}", generator.summarize(&question, &result).await?);
                }
            }
        }
    }

    Ok(())
}

fn parse_target(s: &str) -> Result<DatabaseTarget> {
    match DatabaseTarget::parse(s) {
        Some(target) => Ok(target),
        None => bail!("unknown database target {s:?} (expected \"main\" or \"readonly\")"),
    }
}

fn read_query(arg: Option<String>) -> Result<SearchQuery> {
    let text = match arg {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buffer)?;
            buffer
        }
    };
    serde_json::from_str(&text).context("invalid SearchQuery JSON")
}
