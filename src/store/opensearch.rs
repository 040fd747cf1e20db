/// Alibaba Cloud OpenSearch (vector search edition)
///
/// Documents are pushed to the `<instance_id>_<datasource_name>` table and
/// queried through the vector service. Field names come from the configured
/// `field_name_mapping`; embeddings travel as comma-joined floats.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{embed_chunks, DocumentChunk, KnowledgeStore};
use crate::config::{FieldNameMapping, OpenSearchConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::{BotError, Result};

const BACKEND: &str = "AlibabaCloudOpenSearch";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    result: Vec<QueryHit>,
    #[serde(rename = "errorCode", default)]
    error_code: Option<i64>,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryHit {
    #[serde(default)]
    fields: HashMap<String, serde_json::Value>,
}

pub struct OpenSearchStore {
    base_url: String,
    table_name: String,
    index_name: String,
    fields: FieldNameMapping,
    username: String,
    password: String,
    embedder: Arc<dyn EmbeddingProvider>,
    http_client: reqwest::Client,
}

impl OpenSearchStore {
    pub fn new(cfg: &OpenSearchConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if cfg.endpoint.trim().is_empty() || cfg.instance_id.trim().is_empty() {
            return Err(BotError::backend(BACKEND, "endpoint and instance_id must be set"));
        }
        log::info!("Start Connect {}", BACKEND);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| BotError::backend(BACKEND, format!("Failed to create HTTP client: {}", e)))?;

        let base_url = if cfg.endpoint.starts_with("http://") || cfg.endpoint.starts_with("https://") {
            cfg.endpoint.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", cfg.endpoint.trim_end_matches('/'))
        };

        Ok(Self {
            base_url,
            table_name: cfg.table_name(),
            index_name: cfg.embedding_index_name.clone(),
            fields: cfg.field_name_mapping.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            embedder,
            http_client,
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<String> {
        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await
            .map_err(|e| BotError::backend(BACKEND, e))?;

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
}

#[async_trait]
impl KnowledgeStore for OpenSearchStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn add_documents(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let vectors = embed_chunks(self.embedder.as_ref(), chunks).await?;
        let body = push_body(&self.fields, chunks, &vectors);

        self.post(&format!("/update/{}/actions/bulk", self.table_name), &body)
            .await?;
        Ok(chunks.len())
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<DocumentChunk>> {
        let query_vector = self.embedder.embed_query(query).await?;
        let body = json!({
            "tableName": self.table_name,
            "indexName": self.index_name,
            "vector": query_vector,
            "topK": k,
            "includeVector": false,
            "outputFields": [self.fields.document, self.fields.source],
        });

        let text = self.post("/vector-service/query", &body).await?;
        parse_query_response(&self.fields, &text)
    }
}

fn push_body(fields: &FieldNameMapping, chunks: &[DocumentChunk], vectors: &[Vec<f32>]) -> serde_json::Value {
    let docs: Vec<serde_json::Value> = chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| {
            let mut doc = serde_json::Map::new();
            doc.insert(fields.id.clone(), json!(Uuid::new_v4().to_string()));
            doc.insert(fields.document.clone(), json!(chunk.content));
            doc.insert(fields.embedding.clone(), json!(join_vector(vector)));
            doc.insert(fields.source.clone(), json!(chunk.source().unwrap_or_default()));
            json!({"cmd": "add", "fields": doc})
        })
        .collect();
    serde_json::Value::Array(docs)
}

fn join_vector(vector: &[f32]) -> String {
    vector
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_query_response(fields: &FieldNameMapping, text: &str) -> Result<Vec<DocumentChunk>> {
    let response: QueryResponse = serde_json::from_str(text)?;
    if let Some(code) = response.error_code.filter(|code| *code != 0) {
        return Err(BotError::backend(
            BACKEND,
            format!("query failed ({}): {}", code, response.error_msg.unwrap_or_default()),
        ));
    }

    Ok(response
        .result
        .into_iter()
        .map(|hit| {
            let field = |name: &str| match hit.fields.get(name) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            DocumentChunk::new(field(&fields.document), field(&fields.source))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> FieldNameMapping {
        FieldNameMapping {
            id: "id".into(),
            document: "document".into(),
            embedding: "embedding".into(),
            source: "source".into(),
        }
    }

    #[test]
    fn push_body_uses_mapped_field_names() {
        let chunks = vec![DocumentChunk::new("hello", "docs/a.txt")];
        let body = push_body(&mapping(), &chunks, &[vec![0.5, 1.0]]);

        let doc = &body[0];
        assert_eq!(doc["cmd"], "add");
        assert_eq!(doc["fields"]["document"], "hello");
        assert_eq!(doc["fields"]["source"], "docs/a.txt");
        assert_eq!(doc["fields"]["embedding"], "0.5,1");
        assert!(doc["fields"]["id"].as_str().is_some());
    }

    #[test]
    fn query_response_maps_fields_back_to_chunks() {
        let text = r#"{"result": [
            {"id": "1", "score": 0.1, "fields": {"document": "first", "source": "a.txt"}},
            {"id": "2", "score": 0.2, "fields": {"document": "second", "source": "b.txt"}}
        ], "totalCount": 2}"#;
        let chunks = parse_query_response(&mapping(), text).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "first");
        assert_eq!(chunks[1].source(), Some("b.txt"));
    }

    #[test]
    fn query_error_code_is_reported() {
        let text = r#"{"errorCode": 400, "errorMsg": "table not found"}"#;
        let err = parse_query_response(&mapping(), text).unwrap_err();
        assert!(matches!(err, BotError::BackendUnavailable { .. }));
    }
}
