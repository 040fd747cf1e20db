/// Local file-backed index
///
/// A FAISS `Flat` L2 index (`index.faiss`) plus a docstore sidecar
/// (`index.json`) holding the chunk behind every FAISS row. A small
/// `manifest.json` names the generation of the pair on disk. Ingestion always
/// rebuilds everything from scratch under a new generation; queries reload
/// from disk only when the manifest's generation differs from the cached one,
/// so a rebuild done by another process is picked up without restarting the
/// bot.

use async_trait::async_trait;
use faiss::index::IndexImpl;
use faiss::{index_factory, read_index, write_index, Index, MetricType};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{embed_chunks, DocumentChunk, IngestMode, KnowledgeStore};
use crate::embeddings::EmbeddingProvider;
use crate::error::{BotError, Result};

const BACKEND: &str = "LocalIndex";
const INDEX_FILE: &str = "index.faiss";
const DOCSTORE_FILE: &str = "index.json";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Manifest {
    generation: String,
    dimension: usize,
    rows: usize,
}

/// Chunks in FAISS row order
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Docstore {
    generation: String,
    chunks: Vec<DocumentChunk>,
}

struct LoadedIndex {
    manifest: Manifest,
    index: IndexImpl,
    chunks: Vec<DocumentChunk>,
}

impl LoadedIndex {
    fn search(&mut self, query: &[f32], k: usize) -> Result<Vec<DocumentChunk>> {
        if k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let result = self.index.search(query, k).map_err(faiss_error)?;

        // Rows past the end of a short index come back as empty labels
        Ok(result
            .labels
            .into_iter()
            .filter_map(|label| label.get())
            .filter_map(|row| self.chunks.get(row as usize).cloned())
            .collect())
    }
}

fn faiss_error(e: faiss::error::Error) -> BotError {
    BotError::backend(BACKEND, format!("faiss: {}", e))
}

/// Build an exact L2 index with one row per vector, in order
fn build_flat_index(dimension: usize, vectors: &[Vec<f32>]) -> Result<IndexImpl> {
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(BotError::backend(
            BACKEND,
            format!("vector of dimension {} in an index of dimension {}", bad.len(), dimension),
        ));
    }

    let mut index = index_factory(dimension as u32, "Flat", MetricType::L2).map_err(faiss_error)?;
    let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
    index.add(&flat).map_err(faiss_error)?;
    Ok(index)
}

pub struct LocalIndex {
    index_dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Mutex<Option<LoadedIndex>>,
}

impl LocalIndex {
    pub fn new(index_dir: PathBuf, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index_dir,
            embedder,
            cache: Mutex::new(None),
        }
    }

    /// Number of chunks in the index currently on disk
    pub async fn len(&self) -> Result<usize> {
        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache).await?;
        Ok(cache.as_ref().map(|loaded| loaded.chunks.len()).unwrap_or(0))
    }

    async fn read_manifest(&self) -> Result<Manifest> {
        let path = self.index_dir.join(MANIFEST_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BotError::backend(
                BACKEND,
                format!("no index at {}; run with --upload first", self.index_dir.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Make sure the cached copy is the generation named on disk
    async fn refresh(&self, cache: &mut Option<LoadedIndex>) -> Result<()> {
        let manifest = self.read_manifest().await?;
        if let Some(loaded) = cache.as_ref() {
            if loaded.manifest == manifest {
                return Ok(());
            }
        }

        let bytes = tokio::fs::read(self.index_dir.join(DOCSTORE_FILE)).await?;
        let docstore: Docstore = serde_json::from_slice(&bytes)?;

        let index_path = self.index_dir.join(INDEX_FILE);
        let index = tokio::task::spawn_blocking(move || read_index(index_path.to_string_lossy()))
            .await
            .map_err(|e| BotError::backend(BACKEND, format!("index reader task failed: {}", e)))?
            .map_err(faiss_error)?;

        if docstore.generation != manifest.generation
            || docstore.chunks.len() != manifest.rows
            || index.ntotal() as usize != manifest.rows
        {
            return Err(BotError::backend(
                BACKEND,
                format!("index files in {} are out of step; rebuild in progress?", self.index_dir.display()),
            ));
        }

        log::info!(
            "Loaded local index with {} chunks from {}",
            manifest.rows,
            self.index_dir.display()
        );
        *cache = Some(LoadedIndex {
            manifest,
            index,
            chunks: docstore.chunks,
        });
        Ok(())
    }

    /// Write index, docstore and manifest, each through a rename; the
    /// manifest goes last so readers never switch to a half-written pair
    async fn persist(&self, index: IndexImpl, manifest: &Manifest, chunks: &[DocumentChunk]) -> Result<IndexImpl> {
        tokio::fs::create_dir_all(&self.index_dir).await?;

        let index_path = self.index_dir.join(INDEX_FILE);
        let index_tmp = index_path.with_extension("faiss.tmp");
        let index = {
            let index_tmp = index_tmp.clone();
            tokio::task::spawn_blocking(move || {
                write_index(&index, index_tmp.to_string_lossy()).map(|_| index)
            })
            .await
            .map_err(|e| BotError::backend(BACKEND, format!("index writer task failed: {}", e)))?
            .map_err(faiss_error)?
        };

        let docstore = Docstore {
            generation: manifest.generation.clone(),
            chunks: chunks.to_vec(),
        };
        let docstore_path = self.index_dir.join(DOCSTORE_FILE);
        let docstore_tmp = docstore_path.with_extension("json.tmp");
        tokio::fs::write(&docstore_tmp, serde_json::to_vec(&docstore)?).await?;

        tokio::fs::rename(&index_tmp, &index_path).await?;
        tokio::fs::rename(&docstore_tmp, &docstore_path).await?;

        let manifest_path = self.index_dir.join(MANIFEST_FILE);
        let manifest_tmp = manifest_path.with_extension("json.tmp");
        tokio::fs::write(&manifest_tmp, serde_json::to_vec(manifest)?).await?;
        tokio::fs::rename(&manifest_tmp, &manifest_path).await?;

        log::info!(
            "Saved local index with {} chunks to {}",
            manifest.rows,
            self.index_dir.display()
        );
        Ok(index)
    }
}

#[async_trait]
impl KnowledgeStore for LocalIndex {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn ingest_mode(&self) -> IngestMode {
        IngestMode::Rebuild
    }

    async fn add_documents(&self, _chunks: &[DocumentChunk]) -> Result<usize> {
        Err(BotError::IngestFailed(
            "the local index is rebuilt from the whole corpus and cannot be appended to".into(),
        ))
    }

    async fn rebuild(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Err(BotError::IngestFailed("no chunks to build the local index from".into()));
        }

        let dimension = self.embedder.dimension();
        let vectors = embed_chunks(self.embedder.as_ref(), chunks).await?;
        let index = build_flat_index(dimension, &vectors)?;

        let manifest = Manifest {
            generation: Uuid::new_v4().to_string(),
            dimension,
            rows: chunks.len(),
        };

        let mut cache = self.cache.lock().await;
        let index = self.persist(index, &manifest, chunks).await?;
        *cache = Some(LoadedIndex {
            manifest,
            index,
            chunks: chunks.to_vec(),
        });

        Ok(chunks.len())
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<DocumentChunk>> {
        let query_vector = self.embedder.embed_query(query).await?;

        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache).await?;
        let loaded = cache
            .as_mut()
            .ok_or_else(|| BotError::backend(BACKEND, "index not loaded"))?;

        if query_vector.len() != loaded.manifest.dimension {
            return Err(BotError::backend(
                BACKEND,
                format!(
                    "index was built with dimension {}, query embedding has {}",
                    loaded.manifest.dimension,
                    query_vector.len()
                ),
            ));
        }

        loaded.search(&query_vector, k)
    }
}
