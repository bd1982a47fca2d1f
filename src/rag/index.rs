//! Ephemeral in-memory retrieval index.
//!
//! Documents are split into line-aligned chunks, each chunk is embedded once,
//! and queries are answered by cosine similarity against those embeddings.
//! An index built from an empty document set is valid: it holds no chunks and
//! every retrieval returns nothing, without calling the embedding backend.

use log::debug;
use std::error::Error as StdError;

use crate::llm::embedding::EmbeddingClient;

/// Upper bound on inputs per embedding request.
pub const EMBED_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub score: f32,
    pub document_id: String,
    pub text: String,
}

struct IndexedChunk {
    document_id: String,
    text: String,
    embedding: Vec<f32>,
}

pub struct DocumentIndex {
    chunks: Vec<IndexedChunk>,
}

/// Packs whole lines into chunks of at most `chunk_size` characters. A single
/// line longer than `chunk_size` is split on character boundaries.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let line_len = line.chars().count();
        if line_len > chunk_size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(chunk_size) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() { line_len } else { line_len + 1 };
        if current_len + needed > chunk_size {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl DocumentIndex {
    pub async fn build(
        documents: &[Document],
        embedder: &dyn EmbeddingClient,
        chunk_size: usize
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let mut pending: Vec<(String, String)> = Vec::new();
        for doc in documents {
            for chunk in chunk_text(&doc.text, chunk_size) {
                pending.push((doc.id.clone(), chunk));
            }
        }
        if pending.is_empty() {
            debug!("Building empty document index");
            return Ok(Self { chunks: Vec::new() });
        }

        let texts: Vec<String> = pending.iter().map(|(_, t)| t.clone()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            embeddings.extend(embedder.embed_batch(batch).await?);
        }
        if embeddings.len() != pending.len() {
            return Err(
                format!(
                    "Embedding backend returned {} vectors for {} chunks",
                    embeddings.len(),
                    pending.len()
                ).into()
            );
        }

        let chunks = pending
            .into_iter()
            .zip(embeddings)
            .map(|((document_id, text), embedding)| IndexedChunk { document_id, text, embedding })
            .collect::<Vec<_>>();
        debug!("Indexed {} chunks from {} documents", chunks.len(), documents.len());
        Ok(Self { chunks })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns up to `top_k` chunks, best match first.
    pub async fn retrieve(
        &self,
        query: &str,
        embedder: &dyn EmbeddingClient,
        top_k: usize
    ) -> Result<Vec<ScoredChunk>, Box<dyn StdError + Send + Sync>> {
        if self.chunks.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = embedder.embed(query).await?.embedding;

        let mut scored: Vec<ScoredChunk> = self.chunks
            .iter()
            .map(|c| ScoredChunk {
                score: cosine_similarity(&query_embedding, &c.embedding),
                document_id: c.document_id.clone(),
                text: c.text.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::embedding::testing::KeywordEmbedder;

    fn embedder() -> KeywordEmbedder {
        KeywordEmbedder { vocabulary: vec!["o-ring", "regression", "mars"] }
    }

    #[test]
    fn chunks_respect_size_and_lines() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(chunk_text(text, 9), vec!["aaaa\nbbbb", "cccc"]);
        assert_eq!(chunk_text(text, 100), vec!["aaaa\nbbbb\ncccc"]);
        assert_eq!(chunk_text("abcdefg", 3), vec!["abc", "def", "g"]);
        assert!(chunk_text("\n\n", 10).is_empty());
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_document_set_builds_empty_index() {
        let index = DocumentIndex::build(&[], &embedder(), 64).await.unwrap();
        assert!(index.is_empty());
        assert!(index.retrieve("anything", &embedder(), 2).await.unwrap().is_empty());
    }

    /// Records the size of every batch it is asked to embed.
    #[derive(Default)]
    struct BatchRecorder {
        batches: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl EmbeddingClient for BatchRecorder {
        async fn embed(
            &self,
            _text: &str
        ) -> Result<crate::llm::embedding::EmbeddingResponse, Box<dyn StdError + Send + Sync>> {
            Ok(crate::llm::embedding::EmbeddingResponse { embedding: vec![1.0] })
        }

        async fn embed_batch(
            &self,
            texts: &[String]
        ) -> Result<Vec<Vec<f32>>, Box<dyn StdError + Send + Sync>> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    #[tokio::test]
    async fn large_history_is_embedded_in_bounded_batches() {
        let text = vec!["line"; 2 * EMBED_BATCH_SIZE + 50].join("\n");
        let docs = vec![Document { id: "history".into(), text }];
        let recorder = BatchRecorder::default();

        let index = DocumentIndex::build(&docs, &recorder, 4).await.unwrap();

        assert_eq!(index.len(), 2 * EMBED_BATCH_SIZE + 50);
        assert_eq!(*recorder.batches.lock().unwrap(), vec![EMBED_BATCH_SIZE, EMBED_BATCH_SIZE, 50]);
    }

    #[tokio::test]
    async fn retrieves_best_matching_chunk_first() {
        let docs = vec![Document {
            id: "history".into(),
            text: "0\tWhat temperature breaks the O-ring?\n1\tHow do I run a regression?".into(),
        }];
        let index = DocumentIndex::build(&docs, &embedder(), 40).await.unwrap();
        assert_eq!(index.len(), 2);

        let hits = index.retrieve("regression help", &embedder(), 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("regression"));
        assert_eq!(hits[0].document_id, "history");
    }
}
