//! Storage for docqa: the `SQLite` document registry and the vector index.

pub mod document;
pub mod error;
pub mod in_memory_store;
pub mod qdrant_ops;
pub mod sqlite;
pub mod types;
pub mod vector_store;

pub use error::MemoryError;
pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantOps;
pub use sqlite::SqliteStore;
pub use types::{DocumentId, DocumentRecord, DocumentStatus, chunk_point_id};
pub use vector_store::{
    ChunkPayload, ScoredVectorPoint, VectorPoint, VectorStore, VectorStoreError, rank_points,
};
