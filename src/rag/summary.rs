use log::info;
use serde::Serialize;
use std::error::Error as StdError;
use std::sync::Arc;

use super::index::Document;
use super::rag::RagEngine;
use crate::config::prompt::{ self, PromptConfig };
use crate::history::ConversationTable;

pub const HISTORY_DOCUMENT_ID: &str = "user_history";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub text: String,
    pub source_rows: usize,
}

/// Flattens historical user messages into one tab-separated document, one
/// `index<TAB>content` line per row under a `<TAB>content` header. Returns no
/// document at all when there are no rows.
pub fn history_document(contents: &[String]) -> Vec<Document> {
    if contents.is_empty() {
        return Vec::new();
    }
    let mut text = String::from("\tcontent\n");
    for (i, content) in contents.iter().enumerate() {
        let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
        text.push_str(&format!("{}\t{}\n", i, flat));
    }
    vec![Document {
        id: HISTORY_DOCUMENT_ID.to_string(),
        text,
    }]
}

/// Summarizes what users have asked about across every saved session.
#[derive(Clone)]
pub struct SummaryAnalyzer {
    table: Arc<dyn ConversationTable>,
    rag: RagEngine,
    prompt_config: Arc<PromptConfig>,
}

impl SummaryAnalyzer {
    pub fn new(
        table: Arc<dyn ConversationTable>,
        rag: RagEngine,
        prompt_config: Arc<PromptConfig>
    ) -> Self {
        Self { table, rag, prompt_config }
    }

    pub async fn analyze(&self) -> Result<Summary, Box<dyn StdError + Send + Sync>> {
        let contents = self.table.user_contents().await?;
        let documents = history_document(&contents);
        let query = prompt::get_summary_query(&self.prompt_config)?;

        let text = self.rag.query_and_answer(&documents, &query).await?;
        info!("Summarized {} historical user messages", contents.len());

        Ok(Summary {
            text,
            source_rows: contents.len(),
        })
    }
}
