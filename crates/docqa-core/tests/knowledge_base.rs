use std::sync::Arc;

use docqa_core::KnowledgeBase;
use docqa_core::config::{Config, ProviderKind};
use docqa_index::answer::NO_CONTEXT_ANSWER;
use docqa_index::{CollectionNames, IndexError, Scope};
use docqa_llm::any::AnyProvider;
use docqa_llm::mock::{MOCK_DIMENSION, MockProvider};
use docqa_memory::sqlite::NewDocument;
use docqa_memory::{
    ChunkPayload, DocumentId, DocumentStatus, InMemoryVectorStore, SqliteStore, VectorPoint,
    VectorStore, chunk_point_id,
};

const VALIDATION: &str = "Model validation must be performed by staff independent of model \
development. Validators assess conceptual soundness, data quality and assumptions. \
Findings are tracked until remediation is complete.";

const CAPITAL: &str = "Capital planning relies on stress testing scenarios. Severely \
adverse scenarios project losses over nine quarters. Capital buffers absorb projected \
losses under stress.";

fn config() -> Config {
    let mut config = Config::default();
    config.llm.provider = ProviderKind::Ollama;
    config.llm.retry.base_delay_ms = 0;
    config.llm.retry.max_delay_ms = 0;
    config.chunking.chunk_size = 750;
    config.chunking.chunk_overlap = 0;
    config
}

async fn open(mock: &MockProvider) -> KnowledgeBase {
    open_with(mock, config()).await
}

async fn open_with(mock: &MockProvider, config: Config) -> KnowledgeBase {
    KnowledgeBase::open_with_provider(&config, AnyProvider::Mock(mock.clone()))
        .await
        .unwrap()
}

#[tokio::test]
async fn three_thousand_tokens_index_as_four_chunks() {
    let mock = MockProvider::default();
    let kb = open(&mock).await;
    let body = vec!["word"; 3000].join(" ");

    let doc = kb.upload("long.txt", body.into_bytes()).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Pending);

    let doc = kb.wait_idle(&doc.id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Indexed);
    assert_eq!(doc.chunk_count, 4);

    let names = kb.collection_names();
    let store = kb.vector_store();
    assert_eq!(store.collection_size(&names.document(&doc.id)).await.unwrap(), 4);
    assert_eq!(store.collection_size(&names.global()).await.unwrap(), 4);
    kb.close().await;
}

#[tokio::test]
async fn duplicate_upload_is_rejected() {
    let mock = MockProvider::default();
    let kb = open(&mock).await;

    let first = kb.upload("a.txt", VALIDATION.into()).await.unwrap();
    let err = kb
        .upload("renamed.txt", VALIDATION.into())
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::DuplicateDocument { ref existing } if *existing == first.id));

    kb.wait_idle(&first.id).await.unwrap();
    assert_eq!(kb.list().await.unwrap().len(), 1);
    kb.close().await;
}

#[tokio::test]
async fn changed_content_under_same_name_is_a_new_document() {
    let mock = MockProvider::default();
    let kb = open(&mock).await;

    let a = kb.upload("policy.txt", VALIDATION.into()).await.unwrap();
    let b = kb.upload("policy.txt", CAPITAL.into()).await.unwrap();
    assert_ne!(a.id, b.id);
    kb.close().await;
}

#[tokio::test]
async fn document_scope_is_isolated() {
    let mock = MockProvider::default();
    let kb = open(&mock).await;
    let validation = kb.upload("validation.txt", VALIDATION.into()).await.unwrap();
    let capital = kb.upload("capital.txt", CAPITAL.into()).await.unwrap();
    kb.wait_idle(&validation.id).await.unwrap();
    kb.wait_idle(&capital.id).await.unwrap();

    let result = kb
        .retrieve(
            "stress testing scenarios",
            &Scope::Document(validation.id.clone()),
            None,
        )
        .await
        .unwrap();
    assert!(!result.is_empty());
    assert!(result.chunks.iter().all(|c| c.document_id == validation.id));

    let global = kb
        .retrieve("stress testing scenarios", &Scope::Global, None)
        .await
        .unwrap();
    assert_eq!(global.chunks[0].document_id, capital.id);
    kb.close().await;
}

#[tokio::test]
async fn delete_cascades_to_every_collection() {
    let mock = MockProvider::default();
    let kb = open(&mock).await;
    let validation = kb.upload("validation.txt", VALIDATION.into()).await.unwrap();
    let capital = kb.upload("capital.txt", CAPITAL.into()).await.unwrap();
    kb.wait_idle(&validation.id).await.unwrap();
    kb.wait_idle(&capital.id).await.unwrap();

    kb.delete(&validation.id).await.unwrap();

    let global = kb
        .retrieve("model validation independent", &Scope::Global, Some(10))
        .await
        .unwrap();
    assert!(global.chunks.iter().all(|c| c.document_id != validation.id));
    let names = kb.collection_names();
    assert_eq!(
        kb.vector_store()
            .collection_size(&names.document(&validation.id))
            .await
            .unwrap(),
        0
    );
    assert!(matches!(
        kb.get(&validation.id).await.unwrap_err(),
        IndexError::NotFound(_)
    ));
    assert!(matches!(
        kb.delete(&validation.id).await.unwrap_err(),
        IndexError::NotFound(_)
    ));
    assert!(matches!(
        kb.retrieve("q", &Scope::Document(validation.id.clone()), None)
            .await
            .unwrap_err(),
        IndexError::NotFound(_)
    ));

    // Content of a deleted document can be uploaded again.
    kb.upload("validation.txt", VALIDATION.into()).await.unwrap();
    kb.close().await;
}

#[tokio::test]
async fn empty_knowledge_base_answers_without_provider() {
    let mock = MockProvider::default();
    let kb = open(&mock).await;

    let answer = kb
        .query("What does SR 11-7 require?", &Scope::Global, None)
        .await
        .unwrap();
    assert!(!answer.grounded);
    assert_eq!(answer.text, NO_CONTEXT_ANSWER);
    assert!(answer.citations.is_empty());
    assert_eq!(mock.chat_calls(), 0);
    kb.close().await;
}

#[tokio::test]
async fn query_cites_supplied_documents() {
    let mock = MockProvider::with_responses(vec!["Validation is independent.".into()]);
    let kb = open(&mock).await;
    let doc = kb.upload("validation.txt", VALIDATION.into()).await.unwrap();
    kb.wait_idle(&doc.id).await.unwrap();

    let answer = kb
        .query("Who performs validation?", &Scope::Document(doc.id.clone()), None)
        .await
        .unwrap();
    assert!(answer.grounded);
    assert_eq!(answer.text, "Validation is independent.");
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].document_id, doc.id);
    assert_eq!(mock.chat_calls(), 1);
    kb.close().await;
}

#[tokio::test]
async fn transient_embedding_failures_exhaust_retries() {
    let mock = MockProvider::default().with_transient_embed_failures(3);
    let kb = open(&mock).await;

    let doc = kb.upload("validation.txt", VALIDATION.into()).await.unwrap();
    let doc = kb.wait_idle(&doc.id).await.unwrap();

    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.failure_reason.is_some());
    assert_eq!(mock.embed_calls(), 3);
    let names = kb.collection_names();
    assert_eq!(
        kb.vector_store()
            .collection_size(&names.global())
            .await
            .unwrap(),
        0
    );
    kb.close().await;
}

#[tokio::test]
async fn reprocess_rejects_running_job_and_reindexes_failed_document() {
    let mock = MockProvider::default()
        .with_transient_embed_failures(3)
        .with_delay(50);
    let kb = open(&mock).await;

    let doc = kb.upload("validation.txt", VALIDATION.into()).await.unwrap();
    assert!(matches!(
        kb.reprocess(&doc.id).await.unwrap_err(),
        IndexError::JobInFlight(_)
    ));
    let failed = kb.wait_idle(&doc.id).await.unwrap();
    assert_eq!(failed.status, DocumentStatus::Failed);

    let queued = kb.reprocess(&doc.id).await.unwrap();
    assert_eq!(queued.status, DocumentStatus::Pending);
    let indexed = kb.wait_idle(&doc.id).await.unwrap();
    assert_eq!(indexed.status, DocumentStatus::Indexed);
    assert!(indexed.failure_reason.is_none());
    kb.close().await;
}

#[tokio::test]
async fn delete_cancels_running_job() {
    let mock = MockProvider::default().with_delay(500);
    let kb = open(&mock).await;

    let doc = kb.upload("validation.txt", VALIDATION.into()).await.unwrap();
    kb.delete(&doc.id).await.unwrap();

    assert!(kb.list().await.unwrap().is_empty());
    let names = kb.collection_names();
    assert_eq!(
        kb.vector_store()
            .collection_size(&names.global())
            .await
            .unwrap(),
        0
    );
    kb.close().await;
}

#[tokio::test]
async fn upload_rejects_unsupported_and_oversized_files() {
    let mock = MockProvider::default();
    let mut cfg = config();
    cfg.ingest.max_file_size = 16;
    let kb = open_with(&mock, cfg).await;

    let err = kb.upload("image.png", vec![0x89, b'P', b'N', b'G']).await.unwrap_err();
    assert!(matches!(err, IndexError::Extraction(_)));
    let err = kb.upload("big.txt", vec![b'a'; 17]).await.unwrap_err();
    assert!(matches!(err, IndexError::Extraction(_)));
    assert!(kb.list().await.unwrap().is_empty());
    kb.close().await;
}

#[tokio::test]
async fn stats_report_collections_and_statuses() {
    let mock = MockProvider::default();
    let kb = open(&mock).await;
    let doc = kb.upload("validation.txt", VALIDATION.into()).await.unwrap();
    kb.wait_idle(&doc.id).await.unwrap();

    let stats = kb.stats().await.unwrap();
    assert_eq!(stats.provider, "mock");
    assert_eq!(stats.vector_backend, "in-memory");
    assert_eq!(stats.count(DocumentStatus::Indexed), 1);
    assert_eq!(stats.count(DocumentStatus::Failed), 0);
    assert_eq!(stats.collections.len(), 2);
    assert!(stats.collections.iter().all(|c| c.size == 1));
    assert_eq!(stats.jobs_in_flight, 0);
    kb.close().await;
}

#[tokio::test]
async fn concurrent_uploads_all_index() {
    let mock = MockProvider::default().with_delay(10);
    let mut cfg = config();
    cfg.ingest.max_concurrent_jobs = 2;
    let kb = open_with(&mock, cfg).await;

    let mut ids = Vec::new();
    for i in 0..5 {
        let body = format!("{VALIDATION} Appendix {i}.");
        ids.push(kb.upload(&format!("doc{i}.txt"), body.into_bytes()).await.unwrap().id);
    }
    for id in &ids {
        assert_eq!(kb.wait_idle(id).await.unwrap().status, DocumentStatus::Indexed);
    }
    assert_eq!(kb.stats().await.unwrap().count(DocumentStatus::Indexed), 5);
    kb.close().await;
}

async fn seed(registry: &SqliteStore, name: &str, body: &str, prefix: &str) -> DocumentId {
    let id = DocumentId::generate();
    let collection = CollectionNames::new(prefix).document(&id);
    registry
        .register_document(NewDocument {
            id: &id,
            name,
            content_hash: &format!("seed-{name}"),
            source: body.as_bytes(),
            collection: &collection,
        })
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn restart_fails_interrupted_and_resumes_pending_documents() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("docqa.db");
    let db = db.to_str().unwrap();
    let config = config();
    let prefix = config.storage.collection_prefix.clone();
    let names = CollectionNames::new(prefix.clone());

    let registry = SqliteStore::new(db).await.unwrap();
    let interrupted = seed(&registry, "interrupted.txt", VALIDATION, &prefix).await;
    registry.mark_processing(&interrupted).await.unwrap();
    let queued = seed(&registry, "queued.txt", CAPITAL, &prefix).await;
    registry.close().await;

    // Chunks written before the crash must not stay searchable.
    let store = Arc::new(InMemoryVectorStore::new());
    let stale = VectorPoint {
        id: chunk_point_id(&interrupted, 0),
        vector: vec![1.0; MOCK_DIMENSION],
        payload: ChunkPayload {
            document_id: interrupted.to_string(),
            document_name: "interrupted.txt".into(),
            chunk_index: 0,
            text: "partial".into(),
            byte_start: 0,
            byte_end: 7,
            token_count: 2,
        },
    };
    store.upsert(&names.global(), vec![stale]).await.unwrap();

    let mock = MockProvider::default();
    let kb = KnowledgeBase::open_with_storage(
        &config,
        AnyProvider::Mock(mock.clone()),
        SqliteStore::new(db).await.unwrap(),
        Arc::clone(&store) as Arc<dyn VectorStore>,
    )
    .await
    .unwrap();

    let failed = kb.get(&interrupted).await.unwrap();
    assert_eq!(failed.status, DocumentStatus::Failed);
    assert_eq!(
        failed.failure_reason.as_deref(),
        Some("interrupted before indexing completed")
    );

    let resumed = kb.wait_idle(&queued).await.unwrap();
    assert_eq!(resumed.status, DocumentStatus::Indexed);
    assert!(resumed.chunk_count > 0);
    assert_eq!(
        store.collection_size(&names.global()).await.unwrap(),
        u64::from(resumed.chunk_count)
    );
    kb.close().await;
}
