use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque document identity, a UUID v4 rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_owned()))
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Deterministic point id for a chunk, stable across reprocessing runs.
#[must_use]
pub fn chunk_point_id(document_id: &DocumentId, chunk_index: u32) -> String {
    let name = format!("{document_id}:{chunk_index}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
    Deleted,
}

impl DocumentStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Indexed,
        Self::Failed,
        Self::Deleted,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    /// `indexed`, `failed` and `deleted` only change through an explicit request.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Indexed | Self::Failed | Self::Deleted)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown document status: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub name: String,
    pub content_hash: String,
    pub byte_size: u64,
    pub status: DocumentStatus,
    pub collection: String,
    pub chunk_count: u32,
    pub failure_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in DocumentStatus::ALL {
            assert_eq!(status.as_str().parse::<DocumentStatus>(), Ok(status));
        }
        assert!("archived".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn settled_states() {
        assert!(!DocumentStatus::Pending.is_settled());
        assert!(!DocumentStatus::Processing.is_settled());
        assert!(DocumentStatus::Indexed.is_settled());
        assert!(DocumentStatus::Failed.is_settled());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(DocumentId::generate(), DocumentId::generate());
    }

    #[test]
    fn chunk_point_id_is_stable_uuid() {
        let doc = DocumentId::from("doc-a");
        let a = chunk_point_id(&doc, 3);
        assert_eq!(a, chunk_point_id(&doc, 3));
        assert_ne!(a, chunk_point_id(&doc, 4));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn document_id_parse_trims() {
        let id: DocumentId = "  abc \n".parse().unwrap();
        assert_eq!(id.as_str(), "abc");
    }
}
