/// Postgres-compatible vector stores (AnalyticDB, Hologres)
///
/// Both services speak the Postgres wire protocol but expose different
/// vector SQL: AnalyticDB takes the pgvector surface (`vector` column, `<->`),
/// Hologres its Proxima extension (`float4[]` column,
/// `pm_approx_squared_euclidean_distance`).

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{embed_chunks, DocumentChunk, KnowledgeStore};
use crate::config::{AnalyticDbConfig, HologresConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::{BotError, Result};

/// Collection table shared by every chunk
pub const COLLECTION_TABLE: &str = "langchain_document";

const ANALYTIC_DB_PORT: u16 = 5432;
const ANALYTIC_DB_DATABASE: &str = "postgres";

/// Vector SQL spoken by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PgVector,
    Proxima,
}

impl SqlDialect {
    pub fn create_extension(&self) -> &'static str {
        match self {
            SqlDialect::PgVector => "CREATE EXTENSION IF NOT EXISTS vector",
            SqlDialect::Proxima => "CREATE EXTENSION IF NOT EXISTS proxima",
        }
    }

    pub fn create_table(&self, dimension: usize) -> String {
        let embedding = match self {
            SqlDialect::PgVector => format!("vector({})", dimension),
            SqlDialect::Proxima => format!(
                "float4[] CHECK (array_ndims(embedding) = 1 AND array_length(embedding, 1) = {})",
                dimension
            ),
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, content TEXT NOT NULL, embedding {}, metadata JSONB)",
            COLLECTION_TABLE, embedding
        )
    }

    /// Statement that must follow table creation in the same transaction
    pub fn table_properties(&self) -> Option<String> {
        match self {
            SqlDialect::PgVector => None,
            SqlDialect::Proxima => Some(format!(
                r#"CALL set_table_property('{}', 'proxima_vectortable', '{{"embedding":{{"algorithm":"Graph","distance_method":"SquaredEuclidean","build_params":{{"min_flush_proxima_row_count":1,"min_compaction_proxima_row_count":1,"max_total_size_to_merge_mb":2000}}}}}}')"#,
                COLLECTION_TABLE
            )),
        }
    }

    pub fn insert(&self) -> String {
        format!(
            "INSERT INTO {} (id, content, embedding, metadata) VALUES ($1, $2, $3, $4)",
            COLLECTION_TABLE
        )
    }

    /// Nearest rows to `$1` by squared euclidean distance, `$2` of them
    pub fn search(&self) -> String {
        match self {
            SqlDialect::PgVector => format!(
                "SELECT content, metadata FROM {} ORDER BY embedding <-> $1 LIMIT $2",
                COLLECTION_TABLE
            ),
            SqlDialect::Proxima => format!(
                "SELECT content, metadata, pm_approx_squared_euclidean_distance(embedding, $1::float4[]) AS distance \
                 FROM {} ORDER BY distance ASC LIMIT $2",
                COLLECTION_TABLE
            ),
        }
    }

    /// Bind an embedding the way the dialect's column type expects
    fn bind_embedding<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
        embedding: Vec<f32>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            SqlDialect::PgVector => query.bind(Vector::from(embedding)),
            SqlDialect::Proxima => query.bind(embedding),
        }
    }
}

pub struct PgVectorStore {
    backend: &'static str,
    dialect: SqlDialect,
    db_pool: PgPool,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl PgVectorStore {
    pub async fn analytic_db(cfg: &AnalyticDbConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&cfg.host)
            .port(ANALYTIC_DB_PORT)
            .database(ANALYTIC_DB_DATABASE)
            .username(&cfg.user)
            .password(&cfg.password);
        Self::connect("AnalyticDB", SqlDialect::PgVector, options, embedder).await
    }

    pub async fn hologres(cfg: &HologresConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .database(&cfg.database)
            .username(&cfg.user)
            .password(&cfg.password);
        Self::connect("Hologres", SqlDialect::Proxima, options, embedder).await
    }

    async fn connect(
        backend: &'static str,
        dialect: SqlDialect,
        options: PgConnectOptions,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        log::info!("Connecting to {}...", backend);

        let db_pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(|e| BotError::backend(backend, format!("Failed to connect: {}", e)))?;

        sqlx::query("SELECT 1")
            .fetch_one(&db_pool)
            .await
            .map_err(|e| BotError::backend(backend, format!("Connection test query failed: {}", e)))?;

        let store = Self {
            backend,
            dialect,
            db_pool,
            embedder,
        };
        store.initialize_collection().await?;
        Ok(store)
    }

    /// Create the vector extension and collection table if they don't exist
    async fn initialize_collection(&self) -> Result<()> {
        sqlx::query(self.dialect.create_extension())
            .execute(&self.db_pool)
            .await
            .map_err(|e| self.error("Failed to create vector extension", e))?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(COLLECTION_TABLE)
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| self.error("Failed to look up collection table", e))?;

        if !exists {
            let mut tx = self
                .db_pool
                .begin()
                .await
                .map_err(|e| self.error("Failed to start transaction", e))?;

            sqlx::query(&self.dialect.create_table(self.embedder.dimension()))
                .execute(&mut *tx)
                .await
                .map_err(|e| self.error("Failed to create collection table", e))?;

            if let Some(properties) = self.dialect.table_properties() {
                sqlx::query(&properties)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| self.error("Failed to set table properties", e))?;
            }

            tx.commit()
                .await
                .map_err(|e| self.error("Failed to commit collection table", e))?;
        }

        log::info!("{} collection table {} ready", self.backend, COLLECTION_TABLE);
        Ok(())
    }

    fn error(&self, what: &str, e: sqlx::Error) -> BotError {
        BotError::backend(self.backend, format!("{}: {}", what, e))
    }
}

#[async_trait]
impl KnowledgeStore for PgVectorStore {
    fn backend_name(&self) -> &'static str {
        self.backend
    }

    async fn add_documents(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let vectors = embed_chunks(self.embedder.as_ref(), chunks).await?;

        let insert_query = self.dialect.insert();

        let mut tx = self
            .db_pool
            .begin()
            .await
            .map_err(|e| self.error("Failed to start transaction", e))?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let metadata_json = serde_json::to_value(&chunk.metadata)?;
            let query = sqlx::query(&insert_query)
                .bind(Uuid::new_v4().to_string())
                .bind(&chunk.content);
            self.dialect
                .bind_embedding(query, vector)
                .bind(metadata_json)
                .execute(&mut *tx)
                .await
                .map_err(|e| self.error("Failed to insert embedding", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| self.error("Failed to commit inserted chunks", e))?;

        Ok(chunks.len())
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<DocumentChunk>> {
        let query_embedding = self.embedder.embed_query(query).await?;

        let search_query = self.dialect.search();

        let rows = self
            .dialect
            .bind_embedding(sqlx::query(&search_query), query_embedding)
            .bind(k as i64)
            .fetch_all(&self.db_pool)
            .await
            .map_err(|e| self.error("Failed to search for similar vectors", e))?;

        rows.into_iter()
            .map(|row| {
                let content: String = row
                    .try_get("content")
                    .map_err(|e| self.error("Malformed row", e))?;
                let metadata: Option<serde_json::Value> = row
                    .try_get("metadata")
                    .map_err(|e| self.error("Malformed row", e))?;
                Ok(DocumentChunk {
                    content,
                    metadata: metadata.map(metadata_map).unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// Flatten a stored JSON object into string metadata
fn metadata_map(value: serde_json::Value) -> HashMap<String, String> {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_keeps_strings_and_renders_other_values() {
        let map = metadata_map(json!({"source": "docs/a.txt", "page": 3}));
        assert_eq!(map.get("source").map(String::as_str), Some("docs/a.txt"));
        assert_eq!(map.get("page").map(String::as_str), Some("3"));
    }

    #[test]
    fn non_object_metadata_is_empty() {
        assert!(metadata_map(json!(["a"])).is_empty());
    }

    #[test]
    fn pgvector_dialect_uses_vector_column_and_l2_operator() {
        let dialect = SqlDialect::PgVector;
        assert_eq!(dialect.create_extension(), "CREATE EXTENSION IF NOT EXISTS vector");
        assert!(dialect.create_table(384).contains("embedding vector(384)"));
        assert!(dialect.table_properties().is_none());
        assert!(dialect.search().contains("ORDER BY embedding <-> $1 LIMIT $2"));
    }

    #[test]
    fn proxima_dialect_uses_float_arrays() {
        let dialect = SqlDialect::Proxima;
        assert_eq!(dialect.create_extension(), "CREATE EXTENSION IF NOT EXISTS proxima");

        let ddl = dialect.create_table(384);
        assert!(ddl.contains("embedding float4[]"));
        assert!(ddl.contains("array_length(embedding, 1) = 384"));
        assert!(!ddl.contains("vector("));

        let properties = dialect.table_properties().unwrap();
        assert!(properties.starts_with("CALL set_table_property('langchain_document', 'proxima_vectortable'"));
        assert!(properties.contains(r#""distance_method":"SquaredEuclidean""#));
        let json_start = properties.find("'{").unwrap() + 1;
        let json_end = properties.rfind("}'").unwrap() + 1;
        let parsed: serde_json::Value = serde_json::from_str(&properties[json_start..json_end]).unwrap();
        assert_eq!(parsed["embedding"]["algorithm"], "Graph");

        let search = dialect.search();
        assert!(search.contains("pm_approx_squared_euclidean_distance(embedding, $1::float4[])"));
        assert!(search.contains("ORDER BY distance ASC LIMIT $2"));
        assert!(!search.contains("<->"));
    }

    #[test]
    fn both_dialects_insert_the_same_columns() {
        assert_eq!(SqlDialect::PgVector.insert(), SqlDialect::Proxima.insert());
        assert!(SqlDialect::Proxima
            .insert()
            .starts_with("INSERT INTO langchain_document (id, content, embedding, metadata)"));
    }
}
