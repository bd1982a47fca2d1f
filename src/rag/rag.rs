use crate::config::prompt::{ self, PromptConfig };
use crate::llm::chat::ChatClient;
use crate::llm::embedding::EmbeddingClient;
use crate::models::chat::ChatMessage;
use super::index::{ Document, DocumentIndex, ScoredChunk };

use log::{ debug, info };
use std::{ error::Error as StdError, sync::Arc };
use std::fmt;

#[derive(Debug)]
pub struct RagEngineError(pub String);

impl fmt::Display for RagEngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RagEngine Error: {}", self.0)
    }
}

impl StdError for RagEngineError {}

/// Answers one question over a document set by building a throwaway index,
/// retrieving the closest chunks and asking the chat model.
#[derive(Clone)]
pub struct RagEngine {
    chat_client: Arc<dyn ChatClient>,
    embedding_client: Arc<dyn EmbeddingClient>,
    prompt_config: Arc<PromptConfig>,
    chunk_size: usize,
    top_k: usize,
}

impl RagEngine {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        embedding_client: Arc<dyn EmbeddingClient>,
        prompt_config: Arc<PromptConfig>,
        chunk_size: usize,
        top_k: usize
    ) -> Self {
        Self {
            chat_client,
            embedding_client,
            prompt_config,
            chunk_size,
            top_k,
        }
    }

    fn format_chunks_for_prompt(hits: &[ScoredChunk]) -> String {
        hits.iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Returns an empty answer when the documents contain nothing to retrieve.
    pub async fn query_and_answer(
        &self,
        documents: &[Document],
        question: &str
    ) -> Result<String, Box<dyn StdError + Send + Sync>> {
        let index = DocumentIndex::build(documents, self.embedding_client.as_ref(), self.chunk_size)
            .await
            .map_err(|e| Box::new(RagEngineError(format!("Index build failed: {}", e))))?;

        let hits = index
            .retrieve(question, self.embedding_client.as_ref(), self.top_k)
            .await
            .map_err(|e| Box::new(RagEngineError(format!("Retrieval failed: {}", e))))?;
        if hits.is_empty() {
            info!("No indexed content to answer from, returning empty answer");
            return Ok(String::new());
        }
        info!(
            "Retrieved {} of {} chunks (best score {:.4})",
            hits.len(),
            index.len(),
            hits[0].score
        );

        let context = Self::format_chunks_for_prompt(&hits);
        let final_prompt = prompt::get_summary_answer_prompt(&self.prompt_config, &context, question)?;
        debug!("--- Final Answer Prompt ---\n{}\n--------------------------", final_prompt);

        let answer_resp = self.chat_client
            .complete(&[ChatMessage::user(final_prompt)]).await
            .map_err(|e| Box::new(RagEngineError(format!("Final completion failed: {}", e))))?;

        Ok(answer_resp.response.trim().to_string())
    }
}
