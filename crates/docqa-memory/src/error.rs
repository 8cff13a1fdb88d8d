use crate::types::{DocumentId, DocumentStatus};

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] crate::vector_store::VectorStoreError),

    #[error("document {0} not found")]
    NotFound(DocumentId),

    #[error("identical content already registered as document {existing}")]
    DuplicateDocument { existing: DocumentId },

    #[error("document {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: DocumentId,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("corrupt registry row: {0}")]
    Corrupt(String),

    #[error("integer conversion: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),
}
