//! Error types for docqa-index.

use docqa_llm::LlmError;
use docqa_memory::document::DocumentError;
use docqa_memory::{DocumentId, DocumentStatus, MemoryError, VectorStoreError};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The uploaded bytes yielded no usable text.
    #[error("text extraction failed: {0}")]
    Extraction(#[from] DocumentError),

    /// Embedding provider failed after retries or returned a malformed batch.
    #[error("embedding provider error: {0}")]
    Embedding(LlmError),

    /// Completion provider failed after retries.
    #[error("completion provider error: {0}")]
    Completion(LlmError),

    #[error("identical content already registered as document {existing}")]
    DuplicateDocument { existing: DocumentId },

    #[error("vector index write failed: {0}")]
    IndexWrite(#[from] VectorStoreError),

    #[error("document {0} not found")]
    NotFound(DocumentId),

    #[error("document {0} already has a processing job in flight")]
    JobInFlight(DocumentId),

    #[error("document {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: DocumentId,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("processing cancelled")]
    Cancelled,

    #[error("document registry error: {0}")]
    Registry(MemoryError),
}

impl From<MemoryError> for IndexError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::NotFound(id) => Self::NotFound(id),
            MemoryError::DuplicateDocument { existing } => Self::DuplicateDocument { existing },
            MemoryError::InvalidTransition { id, from, to } => {
                Self::InvalidTransition { id, from, to }
            }
            MemoryError::VectorStore(e) => Self::IndexWrite(e),
            other => Self::Registry(other),
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_not_found_maps_to_not_found() {
        let err: IndexError = MemoryError::NotFound(DocumentId::from("d1")).into();
        assert!(matches!(err, IndexError::NotFound(id) if id.as_str() == "d1"));
    }

    #[test]
    fn registry_duplicate_keeps_existing_id() {
        let err: IndexError = MemoryError::DuplicateDocument {
            existing: DocumentId::from("d0"),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "identical content already registered as document d0"
        );
    }

    #[test]
    fn embedding_error_display() {
        let err = IndexError::Embedding(LlmError::RateLimited { retry_after: None });
        assert_eq!(err.to_string(), "embedding provider error: rate limited");
    }
}
