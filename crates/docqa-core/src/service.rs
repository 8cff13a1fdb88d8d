//! The knowledge base service: uploads, background indexing jobs, deletion,
//! reprocessing and grounded querying over one registry and vector index.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use docqa_index::{
    Answer, AnswerAssembler, Chunker, ChunkerConfig, CollectionNames, CompressionMode,
    Compressor, Embedder, IndexError, IngestPipeline, QueryResult, Result, RetrievalConfig,
    Retriever, Scope,
};
use docqa_llm::LlmProvider;
use docqa_llm::any::AnyProvider;
use docqa_memory::document::{self, DocumentError};
use docqa_memory::sqlite::{NewDocument, StatusCount};
use docqa_memory::{DocumentId, DocumentRecord, DocumentStatus, SqliteStore, VectorStore};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bootstrap;
use crate::config::{Config, StorageMode};

const PDF_MAGIC: &[u8] = b"%PDF-";

struct Job {
    generation: u64,
    cancel: CancellationToken,
    /// Fires when the task exits, however it exits.
    done: CancellationToken,
    handle: JoinHandle<()>,
}

type JobMap = Arc<Mutex<HashMap<DocumentId, Job>>>;

/// Shared state a background job needs after the caller returns.
#[derive(Clone)]
struct JobRunner {
    pipeline: Arc<IngestPipeline<AnyProvider>>,
    permits: Arc<Semaphore>,
    jobs: JobMap,
}

impl JobRunner {
    async fn run(
        self,
        doc: DocumentRecord,
        generation: u64,
        cancel: CancellationToken,
        done: CancellationToken,
    ) {
        let _done = done.drop_guard();

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };
        if let Some(_permit) = permit {
            // Outcome is recorded in the registry by the pipeline.
            if let Err(e) = self.pipeline.run(&doc, cancel).await {
                tracing::debug!(document_id = %doc.id, "job finished with error: {e}");
            }
        } else {
            tracing::debug!(document_id = %doc.id, "job cancelled before it started");
        }

        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.get(&doc.id).is_some_and(|j| j.generation == generation) {
            jobs.remove(&doc.id);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub size: u64,
}

/// System information for operators.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub provider: String,
    pub model: String,
    pub embedding_model: String,
    pub storage_mode: StorageMode,
    pub vector_backend: &'static str,
    pub tokenizer: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub compression: CompressionMode,
    pub collections: Vec<CollectionStats>,
    pub documents: Vec<StatusCount>,
    pub jobs_in_flight: usize,
}

impl IndexStats {
    #[must_use]
    pub fn count(&self, status: DocumentStatus) -> u64 {
        self.documents
            .iter()
            .find(|c| c.status == status)
            .map_or(0, |c| c.count)
    }
}

/// Owns the registry, the vector index and every in-flight processing job.
///
/// Create with [`KnowledgeBase::open`] and shut down with [`KnowledgeBase::close`],
/// which cancels running jobs and waits for them to record their outcome.
pub struct KnowledgeBase {
    provider: Arc<AnyProvider>,
    registry: SqliteStore,
    store: Arc<dyn VectorStore>,
    runner: JobRunner,
    retriever: Retriever<AnyProvider>,
    assembler: AnswerAssembler<AnyProvider>,
    names: CollectionNames,
    storage_mode: StorageMode,
    tokenizer: String,
    chunking: ChunkerConfig,
    compression: CompressionMode,
    max_file_size: u64,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl KnowledgeBase {
    /// Validate `config`, build the configured provider and open storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or storage cannot be opened.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let provider = bootstrap::create_provider(config)?;
        bootstrap::health_check(&provider).await;
        Self::open_with_provider(config, provider).await
    }

    /// Open storage around an already constructed provider.
    ///
    /// Documents left `pending` by a previous run are queued again; documents
    /// caught mid-processing are marked `failed`.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be opened or the chunking settings are invalid.
    pub async fn open_with_provider(config: &Config, provider: AnyProvider) -> anyhow::Result<Self> {
        let registry = bootstrap::open_registry(config).await?;
        let store = bootstrap::open_vector_store(config).await?;
        Self::open_with_storage(config, provider, registry, store).await
    }

    /// Assemble the service over an opened registry and vector index.
    ///
    /// Runs the same startup recovery as [`KnowledgeBase::open_with_provider`].
    ///
    /// # Errors
    ///
    /// Returns an error if the chunking settings are invalid or recovery fails.
    pub async fn open_with_storage(
        config: &Config,
        provider: AnyProvider,
        registry: SqliteStore,
        store: Arc<dyn VectorStore>,
    ) -> anyhow::Result<Self> {
        let provider = Arc::new(provider);
        let retry = config.llm.retry.policy();
        let tokenizer = bootstrap::create_tokenizer(config)?;
        let names = CollectionNames::new(config.storage.collection_prefix.clone());

        let chunking = ChunkerConfig {
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
        };
        let chunker = Chunker::new(Arc::clone(&tokenizer), chunking)
            .context("invalid chunking configuration")?;
        let embedder = Embedder::new(Arc::clone(&provider), retry);
        let pipeline = IngestPipeline::new(
            registry.clone(),
            Arc::clone(&store),
            embedder.clone(),
            chunker,
            names.clone(),
            config.ingest.max_file_size,
        );
        let compressor = Compressor::new(
            config.retrieval.compression,
            Arc::clone(&provider),
            config.retrieval.relevance_threshold,
            retry,
        );
        let retriever = Retriever::new(
            Arc::clone(&store),
            embedder,
            compressor,
            names.clone(),
            RetrievalConfig {
                top_k: config.retrieval.top_k,
                score_threshold: config.retrieval.score_threshold,
            },
        );
        let mut assembler = AnswerAssembler::new(
            Arc::clone(&provider),
            Arc::clone(&tokenizer),
            config.answer.max_context_tokens,
            retry,
        );
        if let Some(prompt) = &config.answer.system_prompt {
            assembler = assembler.with_system_prompt(prompt.clone());
        }

        let kb = Self {
            registry,
            store,
            runner: JobRunner {
                pipeline: Arc::new(pipeline),
                permits: Arc::new(Semaphore::new(config.ingest.max_concurrent_jobs.max(1))),
                jobs: Arc::new(Mutex::new(HashMap::new())),
            },
            retriever,
            assembler,
            names,
            storage_mode: config.storage.mode,
            tokenizer: tokenizer.name().to_owned(),
            chunking,
            compression: config.retrieval.compression,
            max_file_size: config.ingest.max_file_size,
            next_generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            provider,
        };
        kb.recover().await?;

        tracing::info!(
            provider = kb.provider.name(),
            model = kb.provider.model(),
            storage = %kb.storage_mode,
            backend = kb.store.backend(),
            "knowledge base opened"
        );
        Ok(kb)
    }

    async fn recover(&self) -> Result<()> {
        for doc in self.registry.list_documents().await? {
            match doc.status {
                DocumentStatus::Processing => {
                    tracing::warn!(document_id = %doc.id, "processing was interrupted");
                    self.runner.pipeline.purge(&doc.id).await?;
                    self.registry
                        .mark_failed(&doc.id, "interrupted before indexing completed")
                        .await?;
                }
                DocumentStatus::Pending => {
                    tracing::info!(document_id = %doc.id, "resuming pending document");
                    self.spawn_job(doc)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Register `bytes` under `name` and start indexing it in the background.
    ///
    /// The returned record is `pending`; use [`KnowledgeBase::wait_idle`] to wait
    /// for the job.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DuplicateDocument`] if identical content is already
    /// registered, or [`IndexError::Extraction`] for oversized or unsupported files.
    pub async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<DocumentRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IndexError::Config("document name must not be empty".into()));
        }
        let size = bytes.len() as u64;
        if size > self.max_file_size {
            return Err(DocumentError::FileTooLarge {
                size,
                limit: self.max_file_size,
            }
            .into());
        }
        if !document::is_supported(name) && !bytes.starts_with(PDF_MAGIC) {
            return Err(DocumentError::UnsupportedFormat(document::extension_of(name)).into());
        }

        let content_hash = blake3::hash(&bytes).to_hex().to_string();
        let id = DocumentId::generate();
        let record = self
            .registry
            .register_document(NewDocument {
                id: &id,
                name,
                content_hash: &content_hash,
                source: &bytes,
                collection: &self.names.document(&id),
            })
            .await?;
        tracing::info!(document_id = %id, name, bytes = size, "document registered");

        self.spawn_job(record.clone())?;
        Ok(record)
    }

    fn spawn_job(&self, doc: DocumentRecord) -> Result<()> {
        let mut jobs = self
            .runner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if jobs.get(&doc.id).is_some_and(|j| !j.handle.is_finished()) {
            return Err(IndexError::JobInFlight(doc.id));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let done = CancellationToken::new();
        let id = doc.id.clone();
        let handle = tokio::spawn(self.runner.clone().run(
            doc,
            generation,
            cancel.clone(),
            done.clone(),
        ));
        jobs.insert(
            id,
            Job {
                generation,
                cancel,
                done,
                handle,
            },
        );
        Ok(())
    }

    fn job_in_flight(&self, id: &DocumentId) -> bool {
        self.runner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|j| !j.handle.is_finished())
    }

    /// All non-deleted documents, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry query fails.
    pub async fn list(&self) -> Result<Vec<DocumentRecord>> {
        Ok(self.registry.list_documents().await?)
    }

    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] for unknown or deleted documents.
    pub async fn get(&self, id: &DocumentId) -> Result<DocumentRecord> {
        Ok(self.registry.get_document(id).await?)
    }

    /// Cancel any running job, remove the document's chunks from every
    /// collection and mark it deleted.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] for unknown or already deleted documents,
    /// or [`IndexError::IndexWrite`] if the vector index rejects the cascade.
    pub async fn delete(&self, id: &DocumentId) -> Result<()> {
        self.registry.get_document(id).await?;

        let job = self
            .runner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(job) = job {
            job.cancel.cancel();
            if let Err(e) = job.handle.await {
                tracing::error!(document_id = %id, "processing task panicked: {e}");
            }
        }

        self.runner.pipeline.purge(id).await?;
        self.registry.mark_deleted(id).await?;
        tracing::info!(document_id = %id, "document deleted");
        Ok(())
    }

    /// Reset an `indexed` or `failed` document to `pending` and index it again.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::JobInFlight`] while a job for `id` is running, or
    /// [`IndexError::InvalidTransition`] for documents that are not settled.
    pub async fn reprocess(&self, id: &DocumentId) -> Result<DocumentRecord> {
        if self.job_in_flight(id) {
            return Err(IndexError::JobInFlight(id.clone()));
        }
        self.registry.reset_for_reprocess(id).await?;
        let record = self.registry.get_document(id).await?;
        tracing::info!(document_id = %id, "document queued for reprocessing");
        self.spawn_job(record.clone())?;
        Ok(record)
    }

    /// Ranked chunks for `question` without generating an answer.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] for a document scope naming an unknown
    /// document, or an embedding, search or compression error.
    pub async fn retrieve(
        &self,
        question: &str,
        scope: &Scope,
        top_k: Option<usize>,
    ) -> Result<QueryResult> {
        if let Scope::Document(id) = scope {
            self.registry.get_document(id).await?;
        }
        self.retriever.retrieve(question, scope, top_k).await
    }

    /// Answer `question` from the documents in `scope`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`KnowledgeBase::retrieve`] and
    /// [`IndexError::Completion`] if generation fails.
    pub async fn query(&self, question: &str, scope: &Scope, top_k: Option<usize>) -> Result<Answer> {
        let result = self.retrieve(question, scope, top_k).await?;
        self.assembler.answer(question, &result).await
    }

    /// Wait until no job is running for `id`, then return its record.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if the document no longer exists.
    pub async fn wait_idle(&self, id: &DocumentId) -> Result<DocumentRecord> {
        let done = self
            .runner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|j| j.done.clone());
        if let Some(done) = done {
            done.cancelled().await;
        }
        self.get(id).await
    }

    /// # Errors
    ///
    /// Returns an error if the registry or vector index cannot be queried.
    pub async fn stats(&self) -> Result<IndexStats> {
        let mut collections = Vec::new();
        for name in self.store.list_collections().await? {
            if !self.names.owns(&name) {
                continue;
            }
            let size = self.store.collection_size(&name).await?;
            collections.push(CollectionStats { name, size });
        }
        collections.sort_by(|a, b| a.name.cmp(&b.name));

        let jobs_in_flight = self
            .runner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|j| !j.handle.is_finished())
            .count();

        Ok(IndexStats {
            provider: self.provider.name().to_owned(),
            model: self.provider.model().to_owned(),
            embedding_model: self.provider.embedding_model().to_owned(),
            storage_mode: self.storage_mode,
            vector_backend: self.store.backend(),
            tokenizer: self.tokenizer.clone(),
            chunk_size: self.chunking.chunk_size,
            chunk_overlap: self.chunking.chunk_overlap,
            compression: self.compression,
            collections,
            documents: self.registry.status_counts().await?,
            jobs_in_flight,
        })
    }

    #[must_use]
    pub fn collection_names(&self) -> &CollectionNames {
        &self.names
    }

    #[must_use]
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Cancel running jobs, wait for them to settle and close the registry.
    pub async fn close(self) {
        self.shutdown.cancel();
        let jobs: Vec<Job> = self
            .runner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, job)| job)
            .collect();
        let cancelled = jobs.len();
        for job in jobs {
            if let Err(e) = job.handle.await {
                tracing::error!("processing task panicked: {e}");
            }
        }
        self.registry.close().await;
        tracing::info!(cancelled, "knowledge base closed");
    }
}
