use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("collection {collection} holds {expected}-dimensional vectors, got {actual}")]
    Dimension {
        collection: String,
        expected: usize,
        actual: usize,
    },
}

/// Everything stored next to a chunk vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: u32,
    pub text: String,
    pub byte_start: u64,
    pub byte_end: u64,
    pub token_count: u32,
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Sort by descending score, then document id, then chunk order.
pub fn rank_points(points: &mut [ScoredVectorPoint]) {
    points.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.payload.document_id.cmp(&b.payload.document_id))
            .then_with(|| a.payload.chunk_index.cmp(&b.payload.chunk_index))
    });
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Collection-scoped nearest-neighbour index using cosine similarity.
///
/// A collection is created implicitly by the first upsert. Searching, sizing or
/// deleting from a collection that does not exist is not an error.
pub trait VectorStore: Send + Sync {
    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Up to `limit` points ranked by [`rank_points`].
    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    fn delete_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn list_collections(&self) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>>;

    fn collection_size(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>>;

    fn backend(&self) -> &'static str;
}
