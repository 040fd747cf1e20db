/// Elasticsearch vector store
///
/// Chunks live in one index with a `text` field, a `metadata` object and an
/// indexed `dense_vector`; retrieval uses approximate kNN search.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{embed_chunks, DocumentChunk, KnowledgeStore};
use crate::config::ElasticsearchConfig;
use crate::embeddings::EmbeddingProvider;
use crate::error::{BotError, Result};

const BACKEND: &str = "Elasticsearch";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: HitSource,
}

#[derive(Debug, Deserialize)]
struct HitSource {
    text: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
}

pub struct ElasticsearchStore {
    base_url: String,
    index: String,
    user: String,
    password: String,
    embedder: Arc<dyn EmbeddingProvider>,
    http_client: reqwest::Client,
}

impl ElasticsearchStore {
    /// Build the client and check the cluster answers with these credentials
    pub async fn connect(cfg: &ElasticsearchConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| BotError::backend(BACKEND, format!("Failed to create HTTP client: {}", e)))?;

        let store = Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            index: cfg.index.clone(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            embedder,
            http_client,
        };

        let response = store
            .request(reqwest::Method::GET, "/")
            .send()
            .await
            .map_err(|e| BotError::backend(BACKEND, format!("Cluster unreachable: {}", e)))?;
        if !response.status().is_success() {
            return Err(BotError::backend(
                BACKEND,
                format!("Cluster rejected connection (status {})", response.status()),
            ));
        }

        Ok(store)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.user, Some(&self.password))
    }

    /// Create the index with a vector mapping unless it already exists
    async fn ensure_index(&self) -> Result<()> {
        let path = format!("/{}", self.index);
        let exists = self
            .request(reqwest::Method::HEAD, &path)
            .send()
            .await
            .map_err(|e| BotError::backend(BACKEND, e))?;
        if exists.status().is_success() {
            return Ok(());
        }

        log::info!("Creating Elasticsearch index {}", self.index);
        let response = self
            .request(reqwest::Method::PUT, &path)
            .json(&index_mapping(self.embedder.dimension()))
            .send()
            .await
            .map_err(|e| BotError::backend(BACKEND, e))?;
        check_status(response).await.map(|_| ())
    }
}

#[async_trait]
impl KnowledgeStore for ElasticsearchStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn add_documents(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.ensure_index().await?;

        let vectors = embed_chunks(self.embedder.as_ref(), chunks).await?;
        let body = bulk_body(&self.index, chunks, &vectors)?;

        let response = self
            .request(reqwest::Method::POST, "/_bulk?refresh=true")
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| BotError::backend(BACKEND, e))?;
        let text = check_status(response).await?;

        let bulk: BulkResponse = serde_json::from_str(&text)?;
        if bulk.errors {
            return Err(BotError::backend(BACKEND, format!("Bulk insert reported errors: {}", text)));
        }
        Ok(chunks.len())
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<DocumentChunk>> {
        let query_vector = self.embedder.embed_query(query).await?;

        let response = self
            .request(reqwest::Method::POST, &format!("/{}/_search", self.index))
            .json(&knn_query(&query_vector, k))
            .send()
            .await
            .map_err(|e| BotError::backend(BACKEND, e))?;
        let text = check_status(response).await?;

        parse_hits(&text)
    }
}

async fn check_status(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| BotError::backend(BACKEND, format!("Failed to read response body: {}", e)))?;
    if !status.is_success() {
        return Err(BotError::backend(BACKEND, format!("status {}: {}", status, text)));
    }
    Ok(text)
}

fn index_mapping(dimension: usize) -> serde_json::Value {
    json!({
        "mappings": {
            "properties": {
                "text": {"type": "text"},
                "metadata": {"type": "object"},
                "vector": {
                    "type": "dense_vector",
                    "dims": dimension,
                    "index": true,
                    "similarity": "cosine"
                }
            }
        }
    })
}

/// NDJSON body for the `_bulk` API, one action and one source line per chunk
fn bulk_body(index: &str, chunks: &[DocumentChunk], vectors: &[Vec<f32>]) -> Result<String> {
    let mut body = String::new();
    for (chunk, vector) in chunks.iter().zip(vectors) {
        let action = json!({"index": {"_index": index, "_id": Uuid::new_v4().to_string()}});
        let source = json!({
            "text": chunk.content,
            "metadata": chunk.metadata,
            "vector": vector,
        });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&source)?);
        body.push('\n');
    }
    Ok(body)
}

fn knn_query(vector: &[f32], k: usize) -> serde_json::Value {
    json!({
        "knn": {
            "field": "vector",
            "query_vector": vector,
            "k": k,
            "num_candidates": k.max(50)
        },
        "size": k,
        "_source": ["text", "metadata"]
    })
}

fn parse_hits(text: &str) -> Result<Vec<DocumentChunk>> {
    let response: SearchResponse = serde_json::from_str(text)?;
    Ok(response
        .hits
        .hits
        .into_iter()
        .map(|hit| DocumentChunk {
            content: hit.source.text,
            metadata: hit.source.metadata,
        })
        .collect())
}
