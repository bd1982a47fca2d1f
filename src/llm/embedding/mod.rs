pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;

use super::{ LlmConfig, LlmType };
use self::ollama::OllamaEmbeddingClient;
use self::openai::OpenAIEmbeddingClient;

#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, Box<dyn StdError + Send + Sync>>;

    /// Embeds several texts, preserving order. Backends that accept batched
    /// input override this to issue a single request.
    async fn embed_batch(
        &self,
        texts: &[String]
    ) -> Result<Vec<Vec<f32>>, Box<dyn StdError + Send + Sync>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?.embedding);
        }
        Ok(out)
    }
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn EmbeddingClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn EmbeddingClient> = match config.llm_type {
        LlmType::Ollama => {
            let specific_client = OllamaEmbeddingClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => {
            let specific_client = OpenAIEmbeddingClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

/// Checks that a batched embedding call returned one vector per input.
pub(crate) fn expect_batch_len(
    embeddings: Vec<Vec<f32>>,
    expected: usize,
    backend: &str
) -> Result<Vec<Vec<f32>>, Box<dyn StdError + Send + Sync>> {
    if embeddings.len() != expected {
        return Err(
            format!(
                "{} embedding returned {} vectors for {} inputs",
                backend,
                embeddings.len(),
                expected
            ).into()
        );
    }
    Ok(embeddings)
}
