use serde::Serialize;

use super::SqliteStore;
use crate::error::MemoryError;
use crate::types::{DocumentId, DocumentRecord, DocumentStatus};

const COLUMNS: &str = "id, name, content_hash, byte_size, status, collection, chunk_count, \
                       failure_reason, created_at, updated_at";

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

type DocumentRow = (
    DocumentId,
    String,
    String,
    i64,
    String,
    String,
    i64,
    Option<String>,
    String,
    String,
);

fn row_to_record(row: DocumentRow) -> Result<DocumentRecord, MemoryError> {
    let (
        id,
        name,
        content_hash,
        byte_size,
        status,
        collection,
        chunk_count,
        failure_reason,
        created_at,
        updated_at,
    ) = row;
    Ok(DocumentRecord {
        id,
        name,
        content_hash,
        byte_size: u64::try_from(byte_size)?,
        status: status.parse().map_err(MemoryError::Corrupt)?,
        collection,
        chunk_count: u32::try_from(chunk_count)?,
        failure_reason,
        created_at,
        updated_at,
    })
}

/// SQL list of status literals; values come from [`DocumentStatus::as_str`] only.
fn status_list(statuses: &[DocumentStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Input for [`SqliteStore::register_document`].
#[derive(Debug, Clone, Copy)]
pub struct NewDocument<'a> {
    pub id: &'a DocumentId,
    pub name: &'a str,
    pub content_hash: &'a str,
    pub source: &'a [u8],
    pub collection: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: DocumentStatus,
    pub count: u64,
}

impl SqliteStore {
    /// Insert a `pending` document.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::DuplicateDocument`] if an active document already has
    /// the same content hash, or a database error.
    pub async fn register_document(
        &self,
        doc: NewDocument<'_>,
    ) -> Result<DocumentRecord, MemoryError> {
        if let Some(existing) = self.find_active_by_hash(doc.content_hash).await? {
            return Err(MemoryError::DuplicateDocument {
                existing: existing.id,
            });
        }

        let byte_size = i64::try_from(doc.source.len())?;
        let inserted = sqlx::query(
            "INSERT INTO documents (id, name, content_hash, source, byte_size, collection) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(doc.id)
        .bind(doc.name)
        .bind(doc.content_hash)
        .bind(doc.source)
        .bind(byte_size)
        .bind(doc.collection)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            // Lost a race with a concurrent upload of the same bytes.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let existing = self
                    .find_active_by_hash(doc.content_hash)
                    .await?
                    .map_or_else(|| doc.id.clone(), |r| r.id);
                return Err(MemoryError::DuplicateDocument { existing });
            }
            Err(e) => return Err(e.into()),
        }

        self.get_document(doc.id).await
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_active_by_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<DocumentRecord>, MemoryError> {
        let row: Option<DocumentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM documents WHERE content_hash = ? AND status != 'deleted'"
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_record).transpose()
    }

    /// Fetch a non-deleted document.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] if the id is unknown or deleted.
    pub async fn get_document(&self, id: &DocumentId) -> Result<DocumentRecord, MemoryError> {
        let row: Option<DocumentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM documents WHERE id = ? AND status != 'deleted'"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_record)
            .transpose()?
            .ok_or_else(|| MemoryError::NotFound(id.clone()))
    }

    /// All non-deleted documents, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>, MemoryError> {
        let rows: Vec<DocumentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM documents WHERE status != 'deleted' \
             ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// Original uploaded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] if the id is unknown or deleted.
    pub async fn document_source(&self, id: &DocumentId) -> Result<Vec<u8>, MemoryError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT source FROM documents WHERE id = ? AND status != 'deleted'")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|r| r.0)
            .ok_or_else(|| MemoryError::NotFound(id.clone()))
    }

    /// `pending` -> `processing`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidTransition`] from any other state.
    pub async fn mark_processing(&self, id: &DocumentId) -> Result<(), MemoryError> {
        let to = DocumentStatus::Processing;
        let result = sqlx::query(&format!(
            "UPDATE documents SET status = ?, updated_at = {NOW} \
             WHERE id = ? AND status IN ({})",
            status_list(&[DocumentStatus::Pending])
        ))
        .bind(to.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.ensure_transitioned(id, to, result.rows_affected()).await
    }

    /// `processing` -> `indexed`, recording the number of chunks written.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidTransition`] from any other state.
    pub async fn mark_indexed(&self, id: &DocumentId, chunk_count: u32) -> Result<(), MemoryError> {
        let to = DocumentStatus::Indexed;
        let result = sqlx::query(&format!(
            "UPDATE documents SET status = ?, chunk_count = ?, failure_reason = NULL, \
             updated_at = {NOW} WHERE id = ? AND status IN ({})",
            status_list(&[DocumentStatus::Processing])
        ))
        .bind(to.as_str())
        .bind(i64::from(chunk_count))
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.ensure_transitioned(id, to, result.rows_affected()).await
    }

    /// `pending` or `processing` -> `failed` with a reason.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidTransition`] from a settled state.
    pub async fn mark_failed(&self, id: &DocumentId, reason: &str) -> Result<(), MemoryError> {
        let to = DocumentStatus::Failed;
        let result = sqlx::query(&format!(
            "UPDATE documents SET status = ?, chunk_count = 0, failure_reason = ?, \
             updated_at = {NOW} WHERE id = ? AND status IN ({})",
            status_list(&[DocumentStatus::Pending, DocumentStatus::Processing])
        ))
        .bind(to.as_str())
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.ensure_transitioned(id, to, result.rows_affected()).await
    }

    /// `indexed` or `failed` -> `pending`, clearing the previous outcome.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidTransition`] while the document is still in flight.
    pub async fn reset_for_reprocess(&self, id: &DocumentId) -> Result<(), MemoryError> {
        let to = DocumentStatus::Pending;
        let result = sqlx::query(&format!(
            "UPDATE documents SET status = ?, chunk_count = 0, failure_reason = NULL, \
             updated_at = {NOW} WHERE id = ? AND status IN ({})",
            status_list(&[DocumentStatus::Indexed, DocumentStatus::Failed])
        ))
        .bind(to.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.ensure_transitioned(id, to, result.rows_affected()).await
    }

    /// Any non-deleted state -> `deleted`. The source bytes are released.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] if the id is unknown or already deleted.
    pub async fn mark_deleted(&self, id: &DocumentId) -> Result<(), MemoryError> {
        let result = sqlx::query(&format!(
            "UPDATE documents SET status = 'deleted', source = X'', updated_at = {NOW} \
             WHERE id = ? AND status != 'deleted'"
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MemoryError::NotFound(id.clone()));
        }
        Ok(())
    }

    /// Document counts for every status, including zero counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn status_counts(&self) -> Result<Vec<StatusCount>, MemoryError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM documents GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut counts: Vec<StatusCount> = DocumentStatus::ALL
            .into_iter()
            .map(|status| StatusCount { status, count: 0 })
            .collect();
        for (status, count) in rows {
            let status: DocumentStatus = status.parse().map_err(MemoryError::Corrupt)?;
            if let Some(slot) = counts.iter_mut().find(|c| c.status == status) {
                slot.count = u64::try_from(count)?;
            }
        }
        Ok(counts)
    }

    async fn raw_status(&self, id: &DocumentId) -> Result<Option<DocumentStatus>, MemoryError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(s,)| s.parse().map_err(MemoryError::Corrupt))
            .transpose()
    }

    async fn ensure_transitioned(
        &self,
        id: &DocumentId,
        to: DocumentStatus,
        rows_affected: u64,
    ) -> Result<(), MemoryError> {
        if rows_affected > 0 {
            tracing::debug!(document_id = %id, status = %to, "document status changed");
            return Ok(());
        }
        match self.raw_status(id).await? {
            None | Some(DocumentStatus::Deleted) => Err(MemoryError::NotFound(id.clone())),
            Some(from) => Err(MemoryError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    async fn register(store: &SqliteStore, name: &str, bytes: &[u8]) -> DocumentRecord {
        let id = DocumentId::generate();
        let hash = format!("hash-{}", String::from_utf8_lossy(bytes));
        let collection = format!("kb_doc_{id}");
        store
            .register_document(NewDocument {
                id: &id,
                name,
                content_hash: &hash,
                source: bytes,
                collection: &collection,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_creates_pending_record() {
        let store = test_store().await;
        let rec = register(&store, "sr-11-7.pdf", b"guidance").await;
        assert_eq!(rec.status, DocumentStatus::Pending);
        assert_eq!(rec.byte_size, 8);
        assert_eq!(rec.chunk_count, 0);
        assert!(rec.failure_reason.is_none());
        assert_eq!(store.document_source(&rec.id).await.unwrap(), b"guidance");
    }

    #[tokio::test]
    async fn duplicate_hash_rejected_while_active() {
        let store = test_store().await;
        let first = register(&store, "a.pdf", b"same").await;
        let id = DocumentId::generate();
        let err = store
            .register_document(NewDocument {
                id: &id,
                name: "b.pdf",
                content_hash: "hash-same",
                source: b"same",
                collection: "kb_doc_b",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateDocument { existing } if existing == first.id));
        assert_eq!(store.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_hash_allowed_after_delete() {
        let store = test_store().await;
        let first = register(&store, "a.pdf", b"same").await;
        store.mark_deleted(&first.id).await.unwrap();
        let second = register(&store, "a.pdf", b"same").await;
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn happy_path_lifecycle() {
        let store = test_store().await;
        let rec = register(&store, "a.pdf", b"a").await;
        store.mark_processing(&rec.id).await.unwrap();
        store.mark_indexed(&rec.id, 4).await.unwrap();
        let rec = store.get_document(&rec.id).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Indexed);
        assert_eq!(rec.chunk_count, 4);
    }

    #[tokio::test]
    async fn indexed_requires_processing() {
        let store = test_store().await;
        let rec = register(&store, "a.pdf", b"a").await;
        let err = store.mark_indexed(&rec.id, 1).await.unwrap_err();
        assert!(matches!(
            err,
            MemoryError::InvalidTransition {
                from: DocumentStatus::Pending,
                to: DocumentStatus::Indexed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_is_settled_until_reprocess() {
        let store = test_store().await;
        let rec = register(&store, "a.pdf", b"a").await;
        store.mark_processing(&rec.id).await.unwrap();
        store.mark_failed(&rec.id, "no text layer").await.unwrap();

        let failed = store.get_document(&rec.id).await.unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("no text layer"));

        assert!(store.mark_processing(&rec.id).await.is_err());
        assert!(store.mark_failed(&rec.id, "again").await.is_err());

        store.reset_for_reprocess(&rec.id).await.unwrap();
        let pending = store.get_document(&rec.id).await.unwrap();
        assert_eq!(pending.status, DocumentStatus::Pending);
        assert!(pending.failure_reason.is_none());
    }

    #[tokio::test]
    async fn reprocess_rejected_while_in_flight() {
        let store = test_store().await;
        let rec = register(&store, "a.pdf", b"a").await;
        store.mark_processing(&rec.id).await.unwrap();
        assert!(matches!(
            store.reset_for_reprocess(&rec.id).await,
            Err(MemoryError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn deleted_documents_are_hidden() {
        let store = test_store().await;
        let rec = register(&store, "a.pdf", b"a").await;
        store.mark_deleted(&rec.id).await.unwrap();
        assert!(matches!(
            store.get_document(&rec.id).await,
            Err(MemoryError::NotFound(_))
        ));
        assert!(store.list_documents().await.unwrap().is_empty());
        assert!(matches!(
            store.mark_deleted(&rec.id).await,
            Err(MemoryError::NotFound(_))
        ));
        assert!(matches!(
            store.mark_processing(&rec.id).await,
            Err(MemoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = test_store().await;
        let id = DocumentId::from("missing");
        assert!(matches!(
            store.mark_failed(&id, "x").await,
            Err(MemoryError::NotFound(_))
        ));
        assert!(matches!(
            store.document_source(&id).await,
            Err(MemoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn status_counts_cover_every_status() {
        let store = test_store().await;
        let a = register(&store, "a.pdf", b"a").await;
        register(&store, "b.pdf", b"b").await;
        store.mark_processing(&a.id).await.unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.len(), DocumentStatus::ALL.len());
        let get = |s| counts.iter().find(|c| c.status == s).unwrap().count;
        assert_eq!(get(DocumentStatus::Pending), 1);
        assert_eq!(get(DocumentStatus::Processing), 1);
        assert_eq!(get(DocumentStatus::Indexed), 0);
    }

    #[tokio::test]
    async fn list_preserves_upload_order() {
        let store = test_store().await;
        let a = register(&store, "a.pdf", b"a").await;
        let b = register(&store, "b.pdf", b"b").await;
        let ids: Vec<_> = store
            .list_documents()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }
}
