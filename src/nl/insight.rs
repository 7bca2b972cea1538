//! Natural-language summaries of result sets.
//!
//! Purely advisory post-processing: the summary text never feeds back into
//! query construction, so a misbehaving model can at worst produce a bad
//! sentence, not a bad statement.

use std::sync::Arc;

use crate::error::Result;
use crate::executor::SearchResult;
use crate::nl::LanguageModel;

/// At most this many rows are shown to the model; enough for a trend
/// summary without shipping a whole export into the prompt.
const INSIGHT_ROW_CAP: usize = 50;

pub struct InsightGenerator {
    model: Arc<dyn LanguageModel>,
}

impl InsightGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn summarize(&self, question: &str, result: &SearchResult) -> Result<String> {
        if result.rows.is_empty() {
            return Ok("The query returned no matching rows.".to_string());
        }

        let sample: Vec<serde_json::Value> = result
            .rows_as_objects()
            .into_iter()
            .take(INSIGHT_ROW_CAP)
            .collect();
        let user_prompt = format!(
            "Question: {question}\n\
             Total matching rows: {}\n\
             First {} rows as JSON:\n{}",
            result.total_count,
            sample.len(),
            serde_json::to_string(&sample).unwrap_or_else(|_| "[]".to_string()),
        );

        let summary = self
            .model
            .complete(
                "You summarize CRM query results in two or three plain \
                 sentences. Mention notable patterns or outliers. Do not \
                 invent data that is not in the rows shown.",
                &user_prompt,
            )
            .await?;
        Ok(summary.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CellValue;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingModel {
        seen_prompt: Mutex<String>,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            *self.seen_prompt.lock().unwrap() = user.to_string();
            Ok("  Scores cluster around 80.  ".to_string())
        }
    }

    fn result_with_rows(n: usize) -> SearchResult {
        SearchResult {
            columns: vec!["score".to_string()],
            rows: (0..n).map(|i| vec![CellValue::Int32(i as i32)]).collect(),
            total_count: n as i64,
            page: 1,
            page_size: 1000,
            total_pages: 1,
        }
    }

    #[tokio::test]
    async fn test_empty_result_short_circuits() {
        let model = Arc::new(RecordingModel {
            seen_prompt: Mutex::new(String::new()),
        });
        let generator = InsightGenerator::new(model.clone());
        let summary = generator
            .summarize("any leads?", &result_with_rows(0))
            .await
            .unwrap();
        assert!(summary.contains("no matching rows"));
        assert!(model.seen_prompt.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_is_row_capped_and_summary_trimmed() {
        let model = Arc::new(RecordingModel {
            seen_prompt: Mutex::new(String::new()),
        });
        let generator = InsightGenerator::new(model.clone());
        let summary = generator
            .summarize("score spread?", &result_with_rows(200))
            .await
            .unwrap();
        assert_eq!(summary, "Scores cluster around 80.");

        let prompt = model.seen_prompt.lock().unwrap();
        assert!(prompt.contains("Total matching rows: 200"));
        assert!(prompt.contains("First 50 rows"));
        // Row 49 made the cut, row 50 did not.
        assert!(prompt.contains("{\"score\":49}"));
        assert!(!prompt.contains("{\"score\":50}"));
    }
}
