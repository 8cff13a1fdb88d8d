use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_pipeline();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("DOCQA_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid DOCQA_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("DOCQA_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("DOCQA_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("DOCQA_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("DOCQA_LLM_MAX_TOKENS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.llm.max_tokens = n;
        }
        if let Ok(v) = std::env::var("DOCQA_LLM_EMBED_BATCH_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.llm.embed_batch_size = Some(n);
        }
        if let Ok(v) = std::env::var("DOCQA_LLM_RETRY_MAX_ATTEMPTS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.llm.retry.max_attempts = n;
        }
    }

    fn apply_env_overrides_pipeline(&mut self) {
        if let Ok(v) = std::env::var("DOCQA_STORAGE_MODE") {
            if let Ok(mode) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.storage.mode = mode;
            } else {
                tracing::warn!("ignoring invalid DOCQA_STORAGE_MODE value: {v}");
            }
        }
        if let Ok(v) = std::env::var("DOCQA_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("DOCQA_QDRANT_URL") {
            self.storage.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("DOCQA_COLLECTION_PREFIX") {
            self.storage.collection_prefix = v;
        }
        if let Ok(v) = std::env::var("DOCQA_CHUNK_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.chunk_size = n;
        }
        if let Ok(v) = std::env::var("DOCQA_CHUNK_OVERLAP")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.chunk_overlap = n;
        }
        if let Ok(v) = std::env::var("DOCQA_RETRIEVAL_TOP_K")
            && let Ok(n) = v.parse::<usize>()
        {
            self.retrieval.top_k = n;
        }
        if let Ok(v) = std::env::var("DOCQA_RETRIEVAL_SCORE_THRESHOLD")
            && let Ok(t) = v.parse::<f32>()
        {
            self.retrieval.score_threshold = Some(t);
        }
        if let Ok(v) = std::env::var("DOCQA_RETRIEVAL_COMPRESSION") {
            if let Ok(mode) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.retrieval.compression = mode;
            } else {
                tracing::warn!("ignoring invalid DOCQA_RETRIEVAL_COMPRESSION value: {v}");
            }
        }
        if let Ok(v) = std::env::var("DOCQA_ANSWER_MAX_CONTEXT_TOKENS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.answer.max_context_tokens = n;
        }
        if let Ok(v) = std::env::var("DOCQA_INGEST_MAX_CONCURRENT_JOBS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.ingest.max_concurrent_jobs = n;
        }
        if let Ok(v) = std::env::var("DOCQA_INGEST_MAX_FILE_SIZE")
            && let Ok(n) = v.parse::<u64>()
        {
            self.ingest.max_file_size = n;
        }
    }
}
