#![allow(dead_code)]

use async_trait::async_trait;
use eas_knowledge_bot::config::{no_overrides, Config};
use eas_knowledge_bot::embeddings::EmbeddingProvider;
use eas_knowledge_bot::inference::InferenceGateway;
use eas_knowledge_bot::store::{DocumentChunk, KnowledgeStore};
use eas_knowledge_bot::Result;
use std::sync::Mutex;

pub const DIMENSION: usize = 64;

/// Deterministic bag-of-words embedder: one hashed bucket per lowercase word
pub struct WordHashEmbedder;

fn bucket(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMENSION as u64) as usize
}

pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMENSION];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        vector[bucket(&word.to_lowercase())] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for WordHashEmbedder {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed(t)).collect())
    }
}

/// Gateway that records every prompt and answers with a fixed body
pub struct StubGateway {
    pub reply: String,
    pub prompts: Mutex<Vec<String>>,
}

impl StubGateway {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceGateway for StubGateway {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

/// Remote-style store that keeps everything it is given, in order
#[derive(Default)]
pub struct RecordingStore {
    pub stored: Mutex<Vec<DocumentChunk>>,
}

#[async_trait]
impl KnowledgeStore for RecordingStore {
    fn backend_name(&self) -> &'static str {
        "Recording"
    }

    async fn add_documents(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        self.stored.lock().unwrap().extend_from_slice(chunks);
        Ok(chunks.len())
    }

    async fn similarity_search(&self, _query: &str, k: usize) -> Result<Vec<DocumentChunk>> {
        Ok(self.stored.lock().unwrap().iter().take(k).cloned().collect())
    }
}

/// Configuration document with no backend section
pub fn config_json(docs_dir: &std::path::Path, index_dir: &std::path::Path) -> serde_json::Value {
    serde_json::json!({
        "EASCfg": {"url": "http://127.0.0.1:9/api/predict/llm", "token": "secret"},
        "embedding": {
            "embedding_model": "SGPT-125M-weightedmean-nli-bitfit",
            "model_dir": "embedding_model/",
            "embedding_dimension": DIMENSION
        },
        "create_docs": {
            "docs_dir": docs_dir,
            "glob": "**/*.txt",
            "chunk_size": 1000,
            "chunk_overlap": 0
        },
        "query_topk": 1,
        "prompt_template": "Context: {context}\nQuestion: {question}",
        "local_index_dir": index_dir
    })
}

pub fn config_from(value: &serde_json::Value) -> Config {
    Config::from_json(&value.to_string(), no_overrides).unwrap()
}
