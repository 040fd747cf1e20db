mod common;

use common::{config_from, config_json, RecordingStore, StubGateway, WordHashEmbedder};
use eas_knowledge_bot::config::KnowledgeBackend;
use eas_knowledge_bot::handlers::answer_text;
use eas_knowledge_bot::rag::RAGSystem;
use eas_knowledge_bot::store::{self, IngestMode, KnowledgeStore, LocalIndex};
use eas_knowledge_bot::BotError;
use std::fs;
use std::sync::Arc;

#[tokio::test]
async fn answers_from_local_index_end_to_end() {
    let docs = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    fs::write(docs.path().join("france.txt"), "Paris is the capital of France.").unwrap();

    let config = config_from(&config_json(docs.path(), index.path()));
    assert!(config.backend.is_local());

    let store = Arc::new(LocalIndex::new(index.path().to_path_buf(), Arc::new(WordHashEmbedder)));
    let gateway = Arc::new(StubGateway::new(r#"{"response": "Paris"}"#));
    let rag = RAGSystem::with_parts(config, store, gateway.clone());

    assert_eq!(rag.upload_custom_knowledge().await.unwrap(), 1);

    let answer = rag.query("What is the capital of France?").await.unwrap();
    assert_eq!(answer, r#"{"response": "Paris"}"#);
    assert_eq!(answer_text(&answer), "Paris");

    let prompts = gateway.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Paris is the capital of France."));
    assert!(prompts[0].contains("What is the capital of France?"));
    assert_eq!(
        prompts[0],
        "Context: -----\n\n1.\nParis is the capital of France.\n\n-----\n\n\nQuestion: What is the capital of France?"
    );
}

#[tokio::test]
async fn retrieval_prefers_the_matching_chunk() {
    let docs = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    fs::write(docs.path().join("a.txt"), "Bananas are yellow fruit.").unwrap();
    fs::write(docs.path().join("b.txt"), "Paris is the capital of France.").unwrap();
    fs::write(docs.path().join("c.txt"), "Rust has a borrow checker.").unwrap();

    let config = config_from(&config_json(docs.path(), index.path()));
    let store = Arc::new(LocalIndex::new(index.path().to_path_buf(), Arc::new(WordHashEmbedder)));
    let rag = RAGSystem::with_parts(config, store, Arc::new(StubGateway::new("{}")));

    rag.upload_custom_knowledge().await.unwrap();
    let chunks = rag.retrieve_relevant_chunks("capital of France").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "Paris is the capital of France.");
}

#[tokio::test]
async fn local_ingestion_rebuilds_instead_of_appending() {
    let docs = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    fs::write(docs.path().join("a.txt"), "alpha beta\n\ngamma delta").unwrap();
    fs::write(docs.path().join("b.txt"), "epsilon zeta").unwrap();

    let mut value = config_json(docs.path(), index.path());
    value["create_docs"]["chunk_size"] = serde_json::json!(12);
    let config = config_from(&value);

    let local = Arc::new(LocalIndex::new(index.path().to_path_buf(), Arc::new(WordHashEmbedder)));
    assert_eq!(local.ingest_mode(), IngestMode::Rebuild);
    let rag = RAGSystem::with_parts(config, local.clone(), Arc::new(StubGateway::new("{}")));

    let first = rag.upload_custom_knowledge().await.unwrap();
    let after_first = local.len().await.unwrap();
    let found_first = local.similarity_search("gamma", 3).await.unwrap();

    let second = rag.upload_custom_knowledge().await.unwrap();
    let after_second = local.len().await.unwrap();
    let found_second = local.similarity_search("gamma", 3).await.unwrap();

    assert_eq!(first, 3);
    assert_eq!(first, second);
    assert_eq!(after_first, 3);
    assert_eq!(after_first, after_second);
    assert_eq!(found_first, found_second);
}

#[tokio::test]
async fn remote_ingestion_appends_duplicates() {
    let docs = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    fs::write(docs.path().join("a.txt"), "Paris is the capital of France.").unwrap();

    let mut value = config_json(docs.path(), index.path());
    value["ElasticSearchCfg"] = serde_json::json!({
        "ES_URL": "http://127.0.0.1:9200", "ES_INDEX": "docs", "ES_USER": "elastic", "ES_PASSWORD": "p"
    });
    let config = config_from(&value);
    assert!(matches!(config.backend, KnowledgeBackend::Elasticsearch(_)));

    let remote = Arc::new(RecordingStore::default());
    assert_eq!(remote.ingest_mode(), IngestMode::Append);
    let rag = RAGSystem::with_parts(config, remote.clone(), Arc::new(StubGateway::new("{}")));

    rag.upload_custom_knowledge().await.unwrap();
    rag.upload_custom_knowledge().await.unwrap();

    let stored = remote.stored.lock().unwrap().clone();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0], stored[1]);
}

#[tokio::test]
async fn query_before_upload_reports_missing_index() {
    let docs = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    let config = config_from(&config_json(docs.path(), index.path()));

    let store = Arc::new(LocalIndex::new(index.path().join("missing"), Arc::new(WordHashEmbedder)));
    let gateway = Arc::new(StubGateway::new("{}"));
    let rag = RAGSystem::with_parts(config, store, gateway.clone());

    let err = rag.query("anything").await.unwrap_err();
    assert!(matches!(err, BotError::BackendUnavailable { backend: "LocalIndex", .. }));
    assert!(gateway.prompts().is_empty());
}

#[tokio::test]
async fn local_index_picks_up_rebuild_from_another_instance() {
    let index = tempfile::tempdir().unwrap();
    let reader = LocalIndex::new(index.path().to_path_buf(), Arc::new(WordHashEmbedder));
    let writer = LocalIndex::new(index.path().to_path_buf(), Arc::new(WordHashEmbedder));

    writer
        .rebuild(&[store::DocumentChunk::new("old content", "a.txt")])
        .await
        .unwrap();
    let before = reader.similarity_search("content", 1).await.unwrap();
    assert_eq!(before[0].content, "old content");

    writer
        .rebuild(&[store::DocumentChunk::new("new content", "b.txt")])
        .await
        .unwrap();
    let after = reader.similarity_search("content", 1).await.unwrap();
    assert_eq!(after[0].content, "new content");
}

#[tokio::test]
async fn selector_defers_local_index_without_touching_disk() {
    let docs = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    let index_dir = index.path().join("faiss_index");
    let config = config_from(&config_json(docs.path(), &index_dir));

    let store = store::connect(&config, Arc::new(WordHashEmbedder)).await.unwrap();
    assert_eq!(store.backend_name(), "LocalIndex");
    assert_eq!(store.ingest_mode(), IngestMode::Rebuild);
    assert!(!index_dir.exists());
}

#[tokio::test]
async fn selector_fails_fast_on_unreachable_elasticsearch() {
    let docs = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    let mut value = config_json(docs.path(), index.path());
    value["ElasticSearchCfg"] = serde_json::json!({
        "ES_URL": "http://127.0.0.1:1", "ES_INDEX": "docs", "ES_USER": "elastic", "ES_PASSWORD": "p"
    });
    let config = config_from(&value);

    let err = match store::connect(&config, Arc::new(WordHashEmbedder)).await {
        Ok(_) => panic!("connect to a closed port should fail"),
        Err(e) => e,
    };
    assert!(matches!(err, BotError::BackendUnavailable { backend: "Elasticsearch", .. }));
}

#[tokio::test]
async fn upload_without_create_docs_is_a_config_error() {
    let docs = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    let mut value = config_json(docs.path(), index.path());
    value.as_object_mut().unwrap().remove("create_docs");
    let config = config_from(&value);

    let store = Arc::new(LocalIndex::new(index.path().to_path_buf(), Arc::new(WordHashEmbedder)));
    let rag = RAGSystem::with_parts(config, store, Arc::new(StubGateway::new("{}")));
    assert!(matches!(
        rag.upload_custom_knowledge().await,
        Err(BotError::ConfigInvalid(_))
    ));
}
