//! Natural-language to SQL translation.
//!
//! The language model sees a schema summary and the user's text, and must
//! answer with one of two JSON shapes: a clarification request for an
//! ambiguous question, or a single read-only SQL statement for a confident
//! one. The model's claims are not trusted: the returned SQL is re-checked
//! against the read-only guard here, and unparsable output fails closed
//! with no best-guess statement.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::DatabaseTarget;
use crate::error::{QueryError, Result};
use crate::guard::is_read_only_query;
use crate::nl::LanguageModel;
use crate::schema::{SchemaCatalog, TableMetadata};

/// Confidence below this threshold always yields a clarification response.
const CONFIDENCE_THRESHOLD: u8 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIntent {
    /// Friendly paraphrase of what the engine understood.
    #[serde(default)]
    pub user_friendly_intent: String,
    /// Terse machine-oriented restatement of the request.
    #[serde(default)]
    pub intent: String,
    /// 0-100; below 60 the request is treated as ambiguous.
    #[serde(default)]
    pub confidence: u8,
    #[serde(default)]
    pub is_ambiguous: bool,
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
    #[serde(default, rename = "suggestedSQL", alias = "suggestedSql")]
    pub suggested_sql: Option<String>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub tables_involved: Vec<String>,
    /// Only ever true after this crate's own guard has re-validated the
    /// statement; the model claiming safety is not enough.
    #[serde(default)]
    pub is_read_only: bool,
}

pub struct IntentTranslator {
    catalog: Arc<SchemaCatalog>,
    model: Arc<dyn LanguageModel>,
}

impl IntentTranslator {
    pub fn new(catalog: Arc<SchemaCatalog>, model: Arc<dyn LanguageModel>) -> Self {
        Self { catalog, model }
    }

    pub async fn translate(
        &self,
        user_query: &str,
        target: DatabaseTarget,
    ) -> Result<QueryIntent> {
        let tables = self.catalog.all_tables_metadata(target).await?;
        let system_prompt = build_system_prompt(&tables);
        let raw = self.model.complete(&system_prompt, user_query).await?;
        debug!(raw_len = raw.len(), "received model output");

        let mut intent = parse_intent(&raw)?;

        if intent.confidence < CONFIDENCE_THRESHOLD {
            intent.is_ambiguous = true;
        }
        if intent.is_ambiguous {
            // An ambiguous response never carries SQL, whatever the model
            // attached to it.
            intent.suggested_sql = None;
            intent.is_read_only = false;
            if intent.clarifying_questions.is_empty() {
                intent
                    .clarifying_questions
                    .push("Could you be more specific about what you want to see?".to_string());
            }
            return Ok(intent);
        }

        match intent.suggested_sql.as_deref() {
            Some(sql) if is_read_only_query(sql) => {
                intent.is_read_only = true;
                Ok(intent)
            }
            Some(_) => Err(QueryError::UnsafeQuery),
            None => Err(QueryError::TranslationUnavailable(
                "confident response carried no SQL statement".to_string(),
            )),
        }
    }
}

/// Parse the model's JSON, tolerating a fenced code block around it. Any
/// other deviation from the expected shape fails closed.
pub fn parse_intent(raw: &str) -> Result<QueryIntent> {
    let body = strip_code_fence(raw);
    serde_json::from_str(body).map_err(|e| {
        QueryError::TranslationUnavailable(format!("unparsable model output: {e}"))
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn build_system_prompt(tables: &[TableMetadata]) -> String {
    let mut prompt = String::from(
        "You translate CRM questions into PostgreSQL.\n\
         Only single read-only SELECT (or WITH) statements are acceptable; \
         never produce INSERT, UPDATE, DELETE, DDL, or multiple statements.\n\
         Use double-quoted identifiers and only tables and columns listed \
         below.\n\nDatabase schema:\n",
    );
    for table in tables {
        prompt.push_str(&schema_summary(table));
    }
    prompt.push_str(
        "\nRespond with a single JSON object and nothing else.\n\
         If the question is ambiguous (confidence below 60), respond with:\n\
         {\"userFriendlyIntent\": \"...\", \"intent\": \"...\", \
         \"confidence\": <0-59>, \"isAmbiguous\": true, \
         \"clarifyingQuestions\": [\"...\"]}\n\
         Otherwise respond with:\n\
         {\"userFriendlyIntent\": \"...\", \"intent\": \"...\", \
         \"confidence\": <60-100>, \"isAmbiguous\": false, \
         \"suggestedSQL\": \"SELECT ...\", \"explanation\": \"...\", \
         \"tablesInvolved\": [\"...\"]}\n",
    );
    prompt
}

/// One table's summary for the prompt: columns with types and nullability,
/// plus a single illustrative row assembled from sampled values.
fn schema_summary(table: &TableMetadata) -> String {
    let mut out = format!(
        "\nTable \"{}\" ({} rows)\n",
        table.table_name, table.record_count
    );
    for column in &table.columns {
        let nullability = if column.is_nullable { "NULL" } else { "NOT NULL" };
        out.push_str(&format!(
            "  {} {} {}\n",
            column.column_name, column.data_type, nullability
        ));
    }
    let mut sample = serde_json::Map::new();
    for column in &table.columns {
        if let Some(value) = table
            .sample_values
            .get(&column.column_name)
            .and_then(|values| values.first())
        {
            sample.insert(column.column_name.clone(), value.clone());
        }
    }
    if !sample.is_empty() {
        out.push_str(&format!(
            "  sample row: {}\n",
            serde_json::Value::Object(sample)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::db::PoolSet;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct ScriptedModel {
        reply: String,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.reply.clone())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Err(QueryError::TranslationUnavailable("offline".to_string()))
        }
    }

    fn contacts_metadata() -> TableMetadata {
        TableMetadata {
            table_name: "contacts".to_string(),
            columns: vec![
                crate::schema::ColumnMetadata {
                    column_name: "name".to_string(),
                    data_type: "text".to_string(),
                    is_nullable: false,
                    default_value: None,
                    max_length: None,
                },
                crate::schema::ColumnMetadata {
                    column_name: "score".to_string(),
                    data_type: "integer".to_string(),
                    is_nullable: true,
                    default_value: None,
                    max_length: None,
                },
            ],
            record_count: 1523,
            sample_values: HashMap::from([(
                "name".to_string(),
                vec![serde_json::json!("Alice")],
            )]),
        }
    }

    fn primed_catalog() -> Arc<SchemaCatalog> {
        let pools = Arc::new(PoolSet::from_config(&EngineConfig::default()).unwrap());
        let catalog = Arc::new(SchemaCatalog::new(pools, Duration::from_secs(300)));
        catalog.prime(DatabaseTarget::Main, vec![contacts_metadata()]);
        catalog
    }

    fn translator(reply: &str) -> IntentTranslator {
        IntentTranslator::new(
            primed_catalog(),
            Arc::new(ScriptedModel {
                reply: reply.to_string(),
            }),
        )
    }

    #[test]
    fn test_parse_plain_json() {
        let intent = parse_intent(
            r#"{"userFriendlyIntent": "all contacts", "confidence": 85,
                "isAmbiguous": false,
                "suggestedSQL": "SELECT * FROM \"contacts\""}"#,
        )
        .unwrap();
        assert_eq!(intent.confidence, 85);
        assert!(!intent.is_ambiguous);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"confidence\": 90, \"isAmbiguous\": false}\n```";
        let intent = parse_intent(raw).unwrap();
        assert_eq!(intent.confidence, 90);

        let raw = "```\n{\"confidence\": 70}\n```";
        assert_eq!(parse_intent(raw).unwrap().confidence, 70);
    }

    #[test]
    fn test_unparsable_output_fails_closed() {
        let err = parse_intent("Sure! Here's the SQL you wanted: SELECT 1").unwrap_err();
        assert!(matches!(err, QueryError::TranslationUnavailable(_)));
    }

    #[test]
    fn test_schema_summary_contents() {
        let summary = schema_summary(&contacts_metadata());
        assert!(summary.contains("Table \"contacts\" (1523 rows)"));
        assert!(summary.contains("name text NOT NULL"));
        assert!(summary.contains("score integer NULL"));
        assert!(summary.contains("sample row:"));
        assert!(summary.contains("Alice"));
    }

    #[tokio::test]
    async fn test_ambiguous_reply_yields_questions_and_no_sql() {
        // "show me recent leads" with no time range: the model flags it
        // ambiguous and even attaches SQL, which must be discarded.
        let t = translator(
            r#"{"userFriendlyIntent": "Recent leads", "intent": "recent_leads",
                "confidence": 40, "isAmbiguous": true,
                "clarifyingQuestions": ["What time range counts as recent?"],
                "suggestedSQL": "SELECT * FROM \"leads\""}"#,
        );
        let intent = t
            .translate("show me recent leads", DatabaseTarget::Main)
            .await
            .unwrap();
        assert!(intent.is_ambiguous);
        assert!(intent.suggested_sql.is_none());
        assert!(!intent.is_read_only);
        assert!(!intent.clarifying_questions.is_empty());
    }

    #[tokio::test]
    async fn test_low_confidence_forces_ambiguity() {
        let t = translator(
            r#"{"confidence": 30, "isAmbiguous": false,
                "suggestedSQL": "SELECT 1"}"#,
        );
        let intent = t.translate("hm", DatabaseTarget::Main).await.unwrap();
        assert!(intent.is_ambiguous);
        assert!(intent.suggested_sql.is_none());
        assert!(!intent.clarifying_questions.is_empty());
    }

    #[tokio::test]
    async fn test_confident_reply_is_guard_checked() {
        let t = translator(
            r#"{"confidence": 90, "isAmbiguous": false,
                "suggestedSQL": "SELECT * FROM \"contacts\" LIMIT 10",
                "tablesInvolved": ["contacts"]}"#,
        );
        let intent = t
            .translate("list ten contacts", DatabaseTarget::Main)
            .await
            .unwrap();
        assert!(intent.is_read_only);
        assert_eq!(
            intent.suggested_sql.as_deref(),
            Some("SELECT * FROM \"contacts\" LIMIT 10")
        );
    }

    #[tokio::test]
    async fn test_model_claiming_read_only_is_not_trusted() {
        let t = translator(
            r#"{"confidence": 95, "isAmbiguous": false, "isReadOnly": true,
                "suggestedSQL": "DELETE FROM \"contacts\""}"#,
        );
        let err = t
            .translate("clean up contacts", DatabaseTarget::Main)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsafeQuery));
    }

    #[tokio::test]
    async fn test_confident_reply_without_sql_fails_closed() {
        let t = translator(r#"{"confidence": 90, "isAmbiguous": false}"#);
        let err = t.translate("anything", DatabaseTarget::Main).await.unwrap_err();
        assert!(matches!(err, QueryError::TranslationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let t = IntentTranslator::new(primed_catalog(), Arc::new(FailingModel));
        let err = t.translate("anything", DatabaseTarget::Main).await.unwrap_err();
        assert!(matches!(err, QueryError::TranslationUnavailable(_)));
    }
}
