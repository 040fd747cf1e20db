/// Configuration module
///
/// Loads the JSON configuration document (`config.json` by default), applies
/// secret overrides from the environment (typically from a .env file) and
/// validates everything into a typed `Config`. The knowledge store backend is
/// resolved here into a single `KnowledgeBackend` value.

use serde::{de, Deserialize, Deserializer};
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{BotError, Result};
use crate::rag::PromptTemplate;

/// Inference gateway (PAI-EAS) endpoint and credentials
#[derive(Debug, Clone, Deserialize)]
pub struct EasConfig {
    pub url: String,
    pub token: String,

    /// Request timeout in seconds; large enough to never trigger in practice
    #[serde(default = "default_eas_timeout", deserialize_with = "flexible_number")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    pub embedding_model: String,
    pub model_dir: String,
    #[serde(deserialize_with = "flexible_number")]
    pub embedding_dimension: usize,

    /// OpenAI-compatible embeddings endpoint serving the model
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_batch_size", deserialize_with = "flexible_number")]
    pub batch_size: usize,
}

impl EmbeddingConfig {
    /// Model identifier sent to the embeddings endpoint (`model_dir/embedding_model`)
    pub fn model_name(&self) -> String {
        Path::new(&self.model_dir)
            .join(&self.embedding_model)
            .to_string_lossy()
            .into_owned()
    }
}

/// AnalyticDB for PostgreSQL
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticDbConfig {
    #[serde(rename = "PG_HOST")]
    pub host: String,
    #[serde(rename = "PG_USER")]
    pub user: String,
    #[serde(rename = "PG_PASSWORD")]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HologresConfig {
    #[serde(rename = "PG_HOST")]
    pub host: String,
    #[serde(rename = "PG_PORT", deserialize_with = "flexible_number")]
    pub port: u16,
    #[serde(rename = "PG_DATABASE")]
    pub database: String,
    #[serde(rename = "PG_USER")]
    pub user: String,
    #[serde(rename = "PG_PASSWORD")]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    #[serde(rename = "ES_URL")]
    pub url: String,
    #[serde(rename = "ES_INDEX")]
    pub index: String,
    #[serde(rename = "ES_USER")]
    pub user: String,
    #[serde(rename = "ES_PASSWORD")]
    pub password: String,
}

/// Alibaba Cloud OpenSearch (vector search edition)
#[derive(Debug, Clone, Deserialize)]
pub struct OpenSearchConfig {
    pub endpoint: String,
    pub instance_id: String,
    pub datasource_name: String,
    pub username: String,
    pub password: String,
    pub embedding_index_name: String,
    pub field_name_mapping: FieldNameMapping,
}

impl OpenSearchConfig {
    pub fn table_name(&self) -> String {
        format!("{}_{}", self.instance_id, self.datasource_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldNameMapping {
    pub id: String,
    pub document: String,
    pub embedding: String,
    pub source: String,
}

/// Corpus ingestion parameters
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDocsConfig {
    pub docs_dir: PathBuf,
    pub glob: String,
    #[serde(deserialize_with = "flexible_number")]
    pub chunk_size: usize,
    #[serde(deserialize_with = "flexible_number")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
}

/// The one knowledge store backend this process talks to
#[derive(Debug, Clone)]
pub enum KnowledgeBackend {
    /// File-backed flat index persisted under `index_dir`
    Local { index_dir: PathBuf },
    AnalyticDb(AnalyticDbConfig),
    Hologres(HologresConfig),
    Elasticsearch(ElasticsearchConfig),
    OpenSearch(OpenSearchConfig),
}

impl KnowledgeBackend {
    pub fn name(&self) -> &'static str {
        match self {
            KnowledgeBackend::Local { .. } => "LocalIndex",
            KnowledgeBackend::AnalyticDb(_) => "AnalyticDB",
            KnowledgeBackend::Hologres(_) => "Hologres",
            KnowledgeBackend::Elasticsearch(_) => "Elasticsearch",
            KnowledgeBackend::OpenSearch(_) => "AlibabaCloudOpenSearch",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, KnowledgeBackend::Local { .. })
    }
}

/// Configuration document as it appears on disk
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "EASCfg")]
    eas: EasConfig,
    embedding: EmbeddingConfig,
    #[serde(rename = "ADBCfg")]
    adb: Option<AnalyticDbConfig>,
    #[serde(rename = "HOLOCfg")]
    holo: Option<HologresConfig>,
    #[serde(rename = "ElasticSearchCfg")]
    elasticsearch: Option<ElasticsearchConfig>,
    #[serde(rename = "OpenSearchCfg")]
    opensearch: Option<OpenSearchConfig>,
    create_docs: Option<CreateDocsConfig>,
    #[serde(deserialize_with = "flexible_number")]
    query_topk: usize,
    prompt_template: String,
    #[serde(rename = "TelegramCfg")]
    telegram: Option<TelegramConfig>,
    #[serde(default = "default_index_dir")]
    local_index_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub eas: EasConfig,
    pub embedding: EmbeddingConfig,
    pub backend: KnowledgeBackend,
    pub create_docs: Option<CreateDocsConfig>,

    /// Number of chunks retrieved per query
    pub query_topk: usize,

    pub prompt_template: PromptTemplate,

    /// Bot token; `None` when the chat front end should not run
    pub telegram_token: Option<String>,
}

impl Config {
    /// Load configuration from a JSON file, with secrets overridable from the
    /// environment (`TELEGRAM_BOT_TOKEN`, `EAS_TOKEN`, `EMBEDDING_API_KEY`)
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON or fails
    /// validation
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        log::info!("Loaded configuration from {}", path.display());

        Self::from_json(&text, |key| env::var(key).ok())
    }

    /// Parse and validate a configuration document, resolving overrides
    /// through `lookup`
    pub fn from_json(text: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(text)
            .map_err(|e| BotError::ConfigInvalid(e.to_string()))?;
        Self::from_raw(raw, lookup)
    }

    fn from_raw(mut raw: RawConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(token) = lookup("EAS_TOKEN") {
            raw.eas.token = token;
        }
        if let Some(key) = lookup("EMBEDDING_API_KEY") {
            raw.embedding.api_key = Some(key);
        }
        let telegram_token = lookup("TELEGRAM_BOT_TOKEN")
            .or_else(|| raw.telegram.map(|t| t.token))
            .filter(|t| !t.trim().is_empty());

        let backend = select_backend(
            raw.adb,
            raw.holo,
            raw.elasticsearch,
            raw.opensearch,
            raw.local_index_dir,
        )?;

        if raw.eas.url.trim().is_empty() {
            return Err(BotError::ConfigInvalid("EASCfg.url must not be empty".into()));
        }
        if raw.query_topk == 0 {
            return Err(BotError::ConfigInvalid("query_topk must be at least 1".into()));
        }
        if raw.embedding.embedding_dimension == 0 {
            return Err(BotError::ConfigInvalid(
                "embedding.embedding_dimension must be at least 1".into(),
            ));
        }
        if raw.embedding.batch_size == 0 {
            return Err(BotError::ConfigInvalid("embedding.batch_size must be at least 1".into()));
        }
        if let Some(docs) = &raw.create_docs {
            if docs.chunk_size == 0 {
                return Err(BotError::ConfigInvalid("create_docs.chunk_size must be at least 1".into()));
            }
            if docs.chunk_overlap > docs.chunk_size {
                return Err(BotError::ConfigInvalid(format!(
                    "create_docs.chunk_overlap ({}) is larger than chunk_size ({})",
                    docs.chunk_overlap, docs.chunk_size
                )));
            }
        }

        let prompt_template = PromptTemplate::parse(&raw.prompt_template)?;

        Ok(Config {
            eas: raw.eas,
            embedding: raw.embedding,
            backend,
            create_docs: raw.create_docs,
            query_topk: raw.query_topk,
            prompt_template,
            telegram_token,
        })
    }
}

/// Resolve the backend sections into one variant; none present means the
/// local index, more than one is rejected
fn select_backend(
    adb: Option<AnalyticDbConfig>,
    holo: Option<HologresConfig>,
    elasticsearch: Option<ElasticsearchConfig>,
    opensearch: Option<OpenSearchConfig>,
    local_index_dir: PathBuf,
) -> Result<KnowledgeBackend> {
    let mut found: Vec<KnowledgeBackend> = Vec::new();
    found.extend(adb.map(KnowledgeBackend::AnalyticDb));
    found.extend(holo.map(KnowledgeBackend::Hologres));
    found.extend(elasticsearch.map(KnowledgeBackend::Elasticsearch));
    found.extend(opensearch.map(KnowledgeBackend::OpenSearch));

    match found.len() {
        0 => Ok(KnowledgeBackend::Local {
            index_dir: local_index_dir,
        }),
        1 => Ok(found.remove(0)),
        _ => {
            let names: Vec<&str> = found.iter().map(KnowledgeBackend::name).collect();
            Err(BotError::ConfigInvalid(format!(
                "only one knowledge store backend may be configured, found: {}",
                names.join(", ")
            )))
        }
    }
}

/// Accept either a JSON number or a numeric string
fn flexible_number<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + TryFrom<u64>,
    <T as FromStr>::Err: Display,
    <T as TryFrom<u64>>::Error: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => T::try_from(n).map_err(de::Error::custom),
        NumberOrString::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn default_eas_timeout() -> u64 {
    10_000
}

fn default_embedding_endpoint() -> String {
    "http://127.0.0.1:8080/v1/embeddings".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("faiss_index")
}

/// Lookup that never finds anything; handy when no overrides should apply
pub fn no_overrides(_: &str) -> Option<String> {
    None
}
