/// RAG (Retrieval-Augmented Generation) module
///
/// This module handles:
/// - Building the knowledge store, embedder and gateway client from config
/// - Ingesting the document corpus into the knowledge store
/// - Semantic retrieval of relevant chunks
/// - Prompt building from the configured template
/// - Sending the prompt to the inference gateway

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::embeddings::{EmbeddingProvider, HttpEmbedder};
use crate::error::{BotError, Result};
use crate::inference::{EasClient, InferenceGateway};
use crate::ingest;
use crate::store::{self, DocumentChunk, IngestMode, KnowledgeStore};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Context,
    Question,
}

/// Prompt template with `{context}` and `{question}` placeholders
///
/// `{{` and `}}` stand for literal braces. Any other placeholder is rejected
/// when the template is parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => {
                                return Err(BotError::ConfigInvalid(
                                    "prompt_template has an unclosed '{'".into(),
                                ))
                            }
                        }
                    }
                    let placeholder = match name.trim() {
                        "context" => Segment::Context,
                        "question" => Segment::Question,
                        other => {
                            return Err(BotError::ConfigInvalid(format!(
                                "prompt_template has unknown placeholder {{{}}}",
                                other
                            )))
                        }
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(placeholder);
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => {
                    return Err(BotError::ConfigInvalid(
                        "prompt_template has a single '}'; write '}}' for a literal brace".into(),
                    ))
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, context: &str, question: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Context => out.push_str(context),
                Segment::Question => out.push_str(question),
            }
        }
        out
    }
}

/// Number the retrieved chunks into one context block, in store order
pub fn assemble_context(chunks: &[DocumentChunk]) -> String {
    let mut context = String::new();
    for (idx, chunk) in chunks.iter().enumerate() {
        context.push_str("-----\n\n");
        context.push_str(&(idx + 1).to_string());
        context.push_str(".\n");
        context.push_str(&chunk.content);
    }
    context.push_str("\n\n-----\n\n");
    context
}

/// Main RAG system structure
pub struct RAGSystem {
    config: Config,
    store: Arc<dyn KnowledgeStore>,
    gateway: Arc<dyn InferenceGateway>,
}

impl RAGSystem {
    /// Initialize the RAG system: one shared embedder, the configured
    /// knowledge store and the gateway client
    ///
    /// # Errors
    /// Fails when a remote knowledge store cannot be reached
    pub async fn new(config: Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbedder::new(&config.embedding)?);
        let store = store::connect(&config, embedder).await?;
        let gateway: Arc<dyn InferenceGateway> = Arc::new(EasClient::new(&config.eas)?);

        Ok(Self::with_parts(config, store, gateway))
    }

    /// Assemble a RAG system from already built collaborators
    pub fn with_parts(
        config: Config,
        store: Arc<dyn KnowledgeStore>,
        gateway: Arc<dyn InferenceGateway>,
    ) -> Self {
        Self {
            config,
            store,
            gateway,
        }
    }

    /// Load the corpus named in `create_docs` and write it to the store
    ///
    /// The local index is rebuilt from scratch; remote stores get the chunks
    /// appended without deduplication.
    pub async fn upload_custom_knowledge(&self) -> Result<usize> {
        let docs = self
            .config
            .create_docs
            .clone()
            .ok_or_else(|| BotError::ConfigInvalid("create_docs section is required for upload".into()))?;

        let chunks = tokio::task::spawn_blocking(move || {
            ingest::load_and_split(&docs.docs_dir, &docs.glob, docs.chunk_size, docs.chunk_overlap)
        })
        .await
        .map_err(|e| BotError::IngestFailed(format!("loader task failed: {}", e)))??;

        log::info!("Uploading custom knowledge.");
        let start = Instant::now();

        let written = match self.store.ingest_mode() {
            IngestMode::Rebuild => self.store.rebuild(&chunks).await?,
            IngestMode::Append => self.store.add_documents(&chunks).await?,
        };

        log::info!(
            "Insert Success. {} chunks written to {}. Cost time: {:.3} s",
            written,
            self.store.backend_name(),
            start.elapsed().as_secs_f64()
        );
        Ok(written)
    }

    /// Retrieve the `query_topk` chunks most relevant to `query`
    pub async fn retrieve_relevant_chunks(&self, query: &str) -> Result<Vec<DocumentChunk>> {
        log::info!("Retrieving relevant chunks for query: {}", query);

        let chunks = self
            .store
            .similarity_search(query, self.config.query_topk)
            .await?;

        log::info!("Retrieved {} relevant chunks", chunks.len());
        Ok(chunks)
    }

    /// Retrieve context for `query` and render it into the prompt template
    pub async fn create_user_query_prompt(&self, query: &str) -> Result<String> {
        let chunks = self.retrieve_relevant_chunks(query).await?;
        let context = assemble_context(&chunks);
        Ok(self.config.prompt_template.render(&context, query))
    }

    /// Main query method that combines retrieval and generation
    ///
    /// # Returns
    /// The gateway's response body, verbatim
    pub async fn query(&self, query: &str) -> Result<String> {
        let prompt = self.create_user_query_prompt(query).await?;

        log::info!("Post user query to EAS-LLM");
        let start = Instant::now();
        let answer = self.gateway.complete(&prompt).await?;
        log::info!(
            "Get response from EAS-LLM. Cost time: {:.3} s",
            start.elapsed().as_secs_f64()
        );

        Ok(answer)
    }
}
