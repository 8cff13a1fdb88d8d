//! Question -> ranked context: embed, search the scoped collection, filter, compress.

use std::sync::Arc;

use docqa_llm::LlmProvider;
use docqa_memory::{DocumentId, ScoredVectorPoint, VectorStore};
use serde::Serialize;

use crate::collection::{CollectionNames, Scope};
use crate::compressor::Compressor;
use crate::embedder::Embedder;
use crate::error::Result;

pub const DEFAULT_TOP_K: usize = 8;

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum cosine similarity to keep a candidate.
    pub score_threshold: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            score_threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub document_id: DocumentId,
    pub document_name: String,
    pub chunk_index: u32,
    pub text: String,
    /// Final relevance after compression; equals `vector_score` without it.
    pub score: f32,
    pub vector_score: f32,
}

impl From<ScoredVectorPoint> for RetrievedChunk {
    fn from(point: ScoredVectorPoint) -> Self {
        Self {
            document_id: DocumentId::from(point.payload.document_id.as_str()),
            document_name: point.payload.document_name,
            chunk_index: point.payload.chunk_index,
            text: point.payload.text,
            score: point.score,
            vector_score: point.score,
        }
    }
}

/// Ranked chunks, best first; ties by document id then chunk order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub chunks: Vec<RetrievedChunk>,
}

impl QueryResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

pub(crate) fn rank_chunks(chunks: &mut [RetrievedChunk]) {
    chunks.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
}

pub struct Retriever<P: LlmProvider> {
    store: Arc<dyn VectorStore>,
    embedder: Embedder<P>,
    compressor: Compressor<P>,
    names: CollectionNames,
    config: RetrievalConfig,
}

impl<P: LlmProvider> Retriever<P> {
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Embedder<P>,
        compressor: Compressor<P>,
        names: CollectionNames,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            compressor,
            names,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve up to `top_k` chunks (configured default when `None`) for `question`.
    ///
    /// An empty or missing collection gives an empty result. When compression
    /// drops every candidate the result is empty as well.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding, search or LLM compression fails.
    pub async fn retrieve(
        &self,
        question: &str,
        scope: &Scope,
        top_k: Option<usize>,
    ) -> Result<QueryResult> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        if top_k == 0 || question.trim().is_empty() {
            return Ok(QueryResult::default());
        }

        let collection = self.names.resolve(scope);
        let vector = self.embedder.embed_query(question).await?;
        let hits = self
            .store
            .search(&collection, vector, top_k as u64)
            .await?;

        let mut candidates: Vec<RetrievedChunk> = hits
            .into_iter()
            .map(RetrievedChunk::from)
            .filter(|c| match scope {
                Scope::Global => true,
                Scope::Document(id) => &c.document_id == id,
            })
            .filter(|c| self.config.score_threshold.is_none_or(|t| c.vector_score >= t))
            .collect();
        let searched = candidates.len();

        candidates = self.compressor.compress(question, candidates).await?;
        rank_chunks(&mut candidates);
        candidates.truncate(top_k);

        tracing::debug!(
            collection,
            searched,
            kept = candidates.len(),
            compression = self.compressor.mode().as_str(),
            "retrieval complete"
        );
        Ok(QueryResult { chunks: candidates })
    }
}
