//! Ingestion job: extract, chunk, embed and index one registered document.

use std::sync::Arc;

use docqa_llm::LlmProvider;
use docqa_memory::{
    ChunkPayload, DocumentId, DocumentRecord, MemoryError, SqliteStore, VectorPoint, VectorStore,
    chunk_point_id, document,
};
use tokio_util::sync::CancellationToken;

use crate::chunker::Chunker;
use crate::collection::CollectionNames;
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};

/// Drives a document from `pending` to `indexed` or `failed`.
///
/// Chunks become searchable only after both the global and the per-document
/// collection accepted them; a failed or cancelled run leaves no chunks behind.
pub struct IngestPipeline<P: LlmProvider> {
    registry: SqliteStore,
    store: Arc<dyn VectorStore>,
    embedder: Embedder<P>,
    chunker: Chunker,
    names: CollectionNames,
    max_file_size: u64,
}

impl<P: LlmProvider> IngestPipeline<P> {
    #[must_use]
    pub fn new(
        registry: SqliteStore,
        store: Arc<dyn VectorStore>,
        embedder: Embedder<P>,
        chunker: Chunker,
        names: CollectionNames,
        max_file_size: u64,
    ) -> Self {
        Self {
            registry,
            store,
            embedder,
            chunker,
            names,
            max_file_size,
        }
    }

    #[must_use]
    pub fn names(&self) -> &CollectionNames {
        &self.names
    }

    /// Process `doc`, returning the number of chunks indexed.
    ///
    /// # Errors
    ///
    /// Returns the cause of failure after the document was marked `failed`,
    /// [`IndexError::Cancelled`] if `cancel` fired first, or a registry error if
    /// the document could not enter `processing`.
    pub async fn run(&self, doc: &DocumentRecord, cancel: CancellationToken) -> Result<u32> {
        self.registry.mark_processing(&doc.id).await?;
        tracing::info!(document_id = %doc.id, name = %doc.name, "ingestion started");

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(IndexError::Cancelled),
            res = self.process(doc) => res,
        };

        match outcome {
            Ok(count) => {
                self.registry.mark_indexed(&doc.id, count).await?;
                tracing::info!(document_id = %doc.id, chunks = count, "document indexed");
                Ok(count)
            }
            Err(e) => {
                if let Err(cleanup) = self.purge(&doc.id).await {
                    tracing::warn!(document_id = %doc.id, "chunk cleanup failed: {cleanup}");
                }
                match self.registry.mark_failed(&doc.id, &e.to_string()).await {
                    Ok(()) => {}
                    // Deleted while running; nothing to record.
                    Err(MemoryError::NotFound(_) | MemoryError::InvalidTransition { .. }) => {}
                    Err(other) => {
                        tracing::error!(document_id = %doc.id, "failed to record failure: {other}");
                    }
                }
                if matches!(e, IndexError::Cancelled) {
                    tracing::info!(document_id = %doc.id, "ingestion cancelled");
                } else {
                    tracing::warn!(document_id = %doc.id, "ingestion failed: {e}");
                }
                Err(e)
            }
        }
    }

    async fn process(&self, doc: &DocumentRecord) -> Result<u32> {
        // Reprocessing starts from an empty slate.
        self.purge(&doc.id).await?;

        let bytes = self.registry.document_source(&doc.id).await?;
        let text = document::extract_text(&doc.name, bytes, self.max_file_size).await?;
        let chunks = self.chunker.chunk(&text);
        tracing::debug!(document_id = %doc.id, chunks = chunks.len(), "document chunked");
        if chunks.is_empty() {
            return Err(IndexError::Extraction(document::DocumentError::EmptyText));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: chunk_point_id(&doc.id, chunk.index),
                vector,
                payload: ChunkPayload {
                    document_id: doc.id.to_string(),
                    document_name: doc.name.clone(),
                    chunk_index: chunk.index,
                    text: chunk.text.clone(),
                    byte_start: chunk.byte_range.start as u64,
                    byte_end: chunk.byte_range.end as u64,
                    token_count: u32::try_from(chunk.token_count()).unwrap_or(u32::MAX),
                },
            })
            .collect();
        let count = u32::try_from(points.len())
            .map_err(|_| IndexError::Config("too many chunks for one document".into()))?;

        self.store.upsert(&self.names.global(), points.clone()).await?;
        self.store
            .upsert(&self.names.document(&doc.id), points)
            .await?;
        Ok(count)
    }

    /// Remove every chunk of `id` from the global and per-document collections.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::IndexWrite`] if the vector store rejects a delete.
    pub async fn purge(&self, id: &DocumentId) -> Result<()> {
        self.store
            .delete_document(&self.names.global(), id.as_str())
            .await?;
        self.store
            .delete_collection(&self.names.document(id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use docqa_llm::RetryPolicy;
    use docqa_llm::mock::MockProvider;
    use docqa_memory::sqlite::NewDocument;
    use docqa_memory::{
        DocumentStatus, InMemoryVectorStore, ScoredVectorPoint, VectorStoreError,
    };

    use super::*;
    use crate::chunker::ChunkerConfig;
    use crate::tokenizer::ApproxTokenizer;

    type StoreFuture<'a, T> =
        std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

    /// Accepts writes to the global collection and rejects per-document ones.
    struct FailingDocumentWrites {
        inner: InMemoryVectorStore,
    }

    impl VectorStore for FailingDocumentWrites {
        fn upsert(
            &self,
            collection: &str,
            points: Vec<VectorPoint>,
        ) -> StoreFuture<'_, std::result::Result<(), VectorStoreError>> {
            if collection.starts_with("t_doc_") {
                return Box::pin(async { Err(VectorStoreError::Upsert("disk full".into())) });
            }
            self.inner.upsert(collection, points)
        }

        fn search(
            &self,
            collection: &str,
            vector: Vec<f32>,
            limit: u64,
        ) -> StoreFuture<'_, std::result::Result<Vec<ScoredVectorPoint>, VectorStoreError>>
        {
            self.inner.search(collection, vector, limit)
        }

        fn delete_document(
            &self,
            collection: &str,
            document_id: &str,
        ) -> StoreFuture<'_, std::result::Result<(), VectorStoreError>> {
            self.inner.delete_document(collection, document_id)
        }

        fn delete_collection(
            &self,
            collection: &str,
        ) -> StoreFuture<'_, std::result::Result<(), VectorStoreError>> {
            self.inner.delete_collection(collection)
        }

        fn list_collections(
            &self,
        ) -> StoreFuture<'_, std::result::Result<Vec<String>, VectorStoreError>> {
            self.inner.list_collections()
        }

        fn collection_size(
            &self,
            collection: &str,
        ) -> StoreFuture<'_, std::result::Result<u64, VectorStoreError>> {
            self.inner.collection_size(collection)
        }

        fn backend(&self) -> &'static str {
            "failing-document-writes"
        }
    }

    struct Fixture {
        registry: SqliteStore,
        store: Arc<InMemoryVectorStore>,
        pipeline: IngestPipeline<MockProvider>,
    }

    fn pipeline_over(
        registry: &SqliteStore,
        store: Arc<dyn VectorStore>,
        mock: MockProvider,
        chunk_size: usize,
    ) -> IngestPipeline<MockProvider> {
        let chunker = Chunker::new(
            Arc::new(ApproxTokenizer),
            ChunkerConfig {
                chunk_size,
                chunk_overlap: 0,
            },
        )
        .unwrap();
        IngestPipeline::new(
            registry.clone(),
            store,
            Embedder::new(Arc::new(mock), RetryPolicy::immediate(3)),
            chunker,
            CollectionNames::new("t"),
            1024 * 1024,
        )
    }

    async fn fixture(mock: MockProvider, chunk_size: usize) -> Fixture {
        let registry = SqliteStore::new(":memory:").await.unwrap();
        let store = Arc::new(InMemoryVectorStore::new());
        let pipeline = pipeline_over(
            &registry,
            Arc::clone(&store) as Arc<dyn VectorStore>,
            mock,
            chunk_size,
        );
        Fixture {
            registry,
            store,
            pipeline,
        }
    }

    async fn register(registry: &SqliteStore, name: &str, body: &str) -> DocumentRecord {
        let id = DocumentId::generate();
        registry
            .register_document(NewDocument {
                id: &id,
                name,
                content_hash: &format!("hash-{name}"),
                source: body.as_bytes(),
                collection: &format!("t_doc_{id}"),
            })
            .await
            .unwrap();
        registry.get_document(&id).await.unwrap()
    }

    fn body(words: usize) -> String {
        (0..words)
            .map(|i| format!("w{}", i % 97))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn indexes_into_both_collections() {
        let f = fixture(MockProvider::default(), 50).await;
        let doc = register(&f.registry, "policy.txt", &body(300)).await;

        let count = f.pipeline.run(&doc, CancellationToken::new()).await.unwrap();
        assert!(count > 1);

        let rec = f.registry.get_document(&doc.id).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Indexed);
        assert_eq!(rec.chunk_count, count);
        assert_eq!(f.store.collection_size("t_global").await.unwrap(), u64::from(count));
        assert_eq!(
            f.store
                .collection_size(&format!("t_doc_{}", doc.id))
                .await
                .unwrap(),
            u64::from(count)
        );
    }

    #[tokio::test]
    async fn embedding_failure_marks_failed_without_chunks() {
        let mock = MockProvider::default().with_transient_embed_failures(3);
        let f = fixture(mock, 50).await;
        let doc = register(&f.registry, "policy.txt", &body(300)).await;

        let err = f.pipeline.run(&doc, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));

        let rec = f.registry.get_document(&doc.id).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Failed);
        assert!(rec.failure_reason.unwrap().contains("embedding"));
        assert_eq!(f.store.collection_size("t_global").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_document_fails_extraction() {
        let f = fixture(MockProvider::default(), 50).await;
        let doc = register(&f.registry, "blank.txt", "   \n\n ").await;

        let err = f.pipeline.run(&doc, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IndexError::Extraction(_)));
        let rec = f.registry.get_document(&doc.id).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn cancelled_run_leaves_nothing_searchable() {
        let f = fixture(MockProvider::default().with_delay(200), 50).await;
        let doc = register(&f.registry, "policy.txt", &body(300)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = f.pipeline.run(&doc, cancel).await.unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
        assert_eq!(f.store.collection_size("t_global").await.unwrap(), 0);
        let rec = f.registry.get_document(&doc.id).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn reprocess_replaces_previous_chunks() {
        let f = fixture(MockProvider::default(), 50).await;
        let doc = register(&f.registry, "policy.txt", &body(300)).await;
        let first = f.pipeline.run(&doc, CancellationToken::new()).await.unwrap();

        f.registry.reset_for_reprocess(&doc.id).await.unwrap();
        let second = f.pipeline.run(&doc, CancellationToken::new()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.store.collection_size("t_global").await.unwrap(), u64::from(second));
    }

    #[tokio::test]
    async fn run_requires_pending_document() {
        let f = fixture(MockProvider::default(), 50).await;
        let doc = register(&f.registry, "policy.txt", &body(100)).await;
        f.pipeline.run(&doc, CancellationToken::new()).await.unwrap();

        let err = f.pipeline.run(&doc, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn partial_write_is_rolled_back() {
        let registry = SqliteStore::new(":memory:").await.unwrap();
        let store = Arc::new(FailingDocumentWrites {
            inner: InMemoryVectorStore::new(),
        });
        let pipeline = pipeline_over(
            &registry,
            Arc::clone(&store) as Arc<dyn VectorStore>,
            MockProvider::default(),
            50,
        );
        let doc = register(&registry, "policy.txt", &body(300)).await;

        let err = pipeline.run(&doc, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IndexError::IndexWrite(_)));
        assert_eq!(store.collection_size("t_global").await.unwrap(), 0);

        let rec = registry.get_document(&doc.id).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Failed);
        assert!(rec.failure_reason.unwrap().contains("disk full"));
    }
}
