/// Knowledge store module
///
/// A knowledge store keeps embedded document chunks and answers
/// nearest-neighbour queries. Exactly one backend is active per process; it
/// is chosen from `Config::backend` by `connect`.

pub mod elasticsearch;
pub mod local;
pub mod opensearch;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, KnowledgeBackend};
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;

pub use elasticsearch::ElasticsearchStore;
pub use local::LocalIndex;
pub use opensearch::OpenSearchStore;
pub use postgres::PgVectorStore;

/// A retrievable slice of a source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: HashMap<String, String>,
}

impl DocumentChunk {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), source.into());
        Self {
            content: content.into(),
            metadata,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").map(String::as_str)
    }
}

/// How an ingestion run writes into a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Throw away the previous content and build from scratch
    Rebuild,
    /// Add to whatever is already stored, without deduplication
    Append,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn ingest_mode(&self) -> IngestMode {
        IngestMode::Append
    }

    /// Embed and store `chunks` next to the existing content
    async fn add_documents(&self, chunks: &[DocumentChunk]) -> Result<usize>;

    /// Replace the whole store content with `chunks`
    async fn rebuild(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        self.add_documents(chunks).await
    }

    /// The `k` chunks closest to `query`, most similar first
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<DocumentChunk>>;
}

/// Embed chunk contents with the shared provider, one vector per chunk
pub(crate) async fn embed_chunks(
    embedder: &dyn EmbeddingProvider,
    chunks: &[DocumentChunk],
) -> Result<Vec<Vec<f32>>> {
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    embedder.embed_documents(&texts).await
}

/// Initialize the backend named by the configuration
///
/// Remote backends connect eagerly so that an unreachable store stops the
/// process at startup; the local index only touches disk when used.
pub async fn connect(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn KnowledgeStore>> {
    let start = Instant::now();

    let store: Arc<dyn KnowledgeStore> = match &config.backend {
        KnowledgeBackend::Local { index_dir } => {
            log::info!("No remote knowledge store configured, using local index at {}", index_dir.display());
            return Ok(Arc::new(LocalIndex::new(index_dir.clone(), embedder)));
        }
        KnowledgeBackend::AnalyticDb(cfg) => Arc::new(PgVectorStore::analytic_db(cfg, embedder).await?),
        KnowledgeBackend::Hologres(cfg) => Arc::new(PgVectorStore::hologres(cfg, embedder).await?),
        KnowledgeBackend::Elasticsearch(cfg) => Arc::new(ElasticsearchStore::connect(cfg, embedder).await?),
        KnowledgeBackend::OpenSearch(cfg) => Arc::new(OpenSearchStore::new(cfg, embedder)?),
    };

    log::info!(
        "Connect {} success. Cost time: {:.3} s",
        store.backend_name(),
        start.elapsed().as_secs_f64()
    );
    Ok(store)
}
