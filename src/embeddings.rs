/// Embedding provider
///
/// Text is turned into vectors by an external embeddings server speaking the
/// OpenAI `/v1/embeddings` contract (text-embeddings-inference, vLLM, a local
/// proxy in front of a sentence-transformers model, ...). One provider is
/// built at startup and shared by every knowledge store backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{BotError, Result};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed a batch of documents, one vector per input in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| BotError::EmbeddingFailed("No embedding returned".into()))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Embeddings over HTTP
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    batch_size: usize,
    http_client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BotError::EmbeddingFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model_name(),
            api_key: config.api_key.clone(),
            dimension: config.embedding_dimension,
            batch_size: config.batch_size,
            http_client,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            input: batch,
            model: &self.model,
        };

        let mut builder = self.http_client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BotError::EmbeddingFailed(format!("Failed to send embedding request: {}", e)))?;

        // Check HTTP status
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(BotError::EmbeddingFailed(format!(
                "Embedding endpoint error (status {}): {}",
                status, error_text
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| BotError::EmbeddingFailed(format!("Failed to read response body: {}", e)))?;

        let response: EmbeddingResponse = serde_json::from_str(&response_text).map_err(|e| {
            BotError::EmbeddingFailed(format!(
                "Failed to parse embedding response ({}). Response was: {}",
                e, response_text
            ))
        })?;

        order_embeddings(response.data, batch.len(), self.dimension)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

/// Put returned embeddings back into input order and check their shape
fn order_embeddings(mut data: Vec<EmbeddingData>, expected: usize, dimension: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(BotError::EmbeddingFailed(format!(
            "Expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }

    data.into_iter()
        .map(|d| {
            if d.embedding.len() == dimension {
                Ok(d.embedding)
            } else {
                Err(BotError::EmbeddingFailed(format!(
                    "Embedding has dimension {}, configured embedding_dimension is {}",
                    d.embedding.len(),
                    dimension
                )))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(index: Option<usize>, embedding: Vec<f32>) -> EmbeddingData {
        EmbeddingData { index, embedding }
    }

    #[test]
    fn embeddings_are_reordered_by_index() {
        let out = order_embeddings(
            vec![data(Some(1), vec![2.0, 2.0]), data(Some(0), vec![1.0, 1.0])],
            2,
            2,
        )
        .unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let err = order_embeddings(vec![data(None, vec![1.0, 2.0, 3.0])], 1, 2).unwrap_err();
        assert!(matches!(err, BotError::EmbeddingFailed(_)));
    }

    #[test]
    fn missing_embeddings_are_rejected() {
        let err = order_embeddings(vec![], 1, 2).unwrap_err();
        assert!(matches!(err, BotError::EmbeddingFailed(_)));
    }
}
