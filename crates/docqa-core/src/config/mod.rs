mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.resolve_secrets();
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be greater than zero");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.chunking.tokenizer == TokenizerKind::HuggingFace
            && self.chunking.tokenizer_path.is_none()
        {
            bail!("chunking.tokenizer_path is required for the huggingface tokenizer");
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be greater than zero");
        }
        if let Some(t) = self.retrieval.score_threshold
            && !(-1.0..=1.0).contains(&t)
        {
            bail!("retrieval.score_threshold must be within [-1, 1], got {t}");
        }
        if !(0.0..=1.0).contains(&self.retrieval.relevance_threshold) {
            bail!(
                "retrieval.relevance_threshold must be within [0, 1], got {}",
                self.retrieval.relevance_threshold
            );
        }
        if self.answer.max_context_tokens == 0 {
            bail!("answer.max_context_tokens must be greater than zero");
        }
        if self.ingest.max_concurrent_jobs == 0 {
            bail!("ingest.max_concurrent_jobs must be greater than zero");
        }
        if self.ingest.max_file_size == 0 {
            bail!("ingest.max_file_size must be greater than zero");
        }
        if self.llm.retry.max_attempts == 0 {
            bail!("llm.retry.max_attempts must be at least 1");
        }
        if self.llm.embed_batch_size == Some(0) {
            bail!("llm.embed_batch_size must be greater than zero");
        }
        let prefix = &self.storage.collection_prefix;
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            bail!("storage.collection_prefix must be non-empty ASCII alphanumerics, '_' or '-'");
        }
        if self.storage.mode == StorageMode::Durable && self.storage.qdrant_url.trim().is_empty() {
            bail!("storage.qdrant_url is required in durable mode");
        }
        if self.llm.provider == ProviderKind::OpenAi && self.secrets.openai_api_key.is_none() {
            bail!("DOCQA_OPENAI_API_KEY (or OPENAI_API_KEY) must be set for the openai provider");
        }
        Ok(())
    }

    fn resolve_secrets(&mut self) {
        self.secrets.openai_api_key = ["DOCQA_OPENAI_API_KEY", "OPENAI_API_KEY"]
            .into_iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
            .map(Secret::new);
    }
}
