use docqa_memory::DocumentId;

/// Which collection a query runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The shared organization knowledge base.
    Global,
    /// One document's isolated collection.
    Document(DocumentId),
}

/// Collection naming: `{prefix}_global` and `{prefix}_doc_{document_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNames {
    prefix: String,
}

impl CollectionNames {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `collection` was named by this scheme.
    #[must_use]
    pub fn owns(&self, collection: &str) -> bool {
        collection
            .strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest == "_global" || rest.starts_with("_doc_"))
    }

    #[must_use]
    pub fn global(&self) -> String {
        format!("{}_global", self.prefix)
    }

    #[must_use]
    pub fn document(&self, id: &DocumentId) -> String {
        format!("{}_doc_{id}", self.prefix)
    }

    #[must_use]
    pub fn resolve(&self, scope: &Scope) -> String {
        match scope {
            Scope::Global => self.global(),
            Scope::Document(id) => self.document(id),
        }
    }
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self::new("docqa")
    }
}
