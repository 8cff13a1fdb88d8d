//! Startup wiring: config resolution, provider, tokenizer and storage construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use docqa_index::{ApproxTokenizer, Tokenizer};
use docqa_llm::any::AnyProvider;
use docqa_llm::ollama::OllamaProvider;
use docqa_llm::openai::OpenAiProvider;
use docqa_memory::{InMemoryVectorStore, QdrantOps, SqliteStore, VectorStore};

use crate::config::{Config, ProviderKind, StorageMode, TokenizerKind};

/// Priority: explicit `--config` > `DOCQA_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("DOCQA_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

/// # Errors
///
/// Returns an error if the provider needs a missing API key or its HTTP client
/// cannot be built.
pub fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let llm = &config.llm;
    let provider = match llm.provider {
        ProviderKind::OpenAi => {
            let api_key = config
                .secrets
                .openai_api_key
                .as_ref()
                .context("DOCQA_OPENAI_API_KEY (or OPENAI_API_KEY) not set")?;
            let mut openai = OpenAiProvider::new(
                api_key.expose().to_owned(),
                llm.base_url.clone(),
                llm.model.clone(),
                llm.embedding_model.clone(),
                llm.max_tokens,
                llm.request_timeout(),
            )
            .context("failed to build openai provider")?;
            if let Some(size) = llm.embed_batch_size {
                openai = openai.with_embed_batch_size(size);
            }
            AnyProvider::OpenAi(openai)
        }
        ProviderKind::Ollama => {
            let mut ollama = OllamaProvider::new(
                &llm.base_url,
                llm.model.clone(),
                llm.embedding_model.clone(),
            );
            if let Some(size) = llm.embed_batch_size {
                ollama = ollama.with_embed_batch_size(size);
            }
            AnyProvider::Ollama(ollama)
        }
    };
    Ok(provider)
}

pub async fn health_check(provider: &AnyProvider) {
    if let AnyProvider::Ollama(ollama) = provider {
        match ollama.health_check().await {
            Ok(()) => tracing::info!("ollama health check passed"),
            Err(e) => tracing::warn!("ollama health check failed: {e:#}"),
        }
    }
}

/// # Errors
///
/// Returns an error if the configured tokenizer cannot be loaded or was not
/// compiled in.
pub fn create_tokenizer(config: &Config) -> anyhow::Result<Arc<dyn Tokenizer>> {
    match config.chunking.tokenizer {
        TokenizerKind::Approx => Ok(Arc::new(ApproxTokenizer)),
        #[cfg(feature = "hf-tokenizer")]
        TokenizerKind::HuggingFace => {
            let path = config
                .chunking
                .tokenizer_path
                .as_deref()
                .context("chunking.tokenizer_path required for huggingface tokenizer")?;
            let tokenizer = docqa_index::tokenizer::HfTokenizer::from_file(Path::new(path))?;
            Ok(Arc::new(tokenizer))
        }
        #[cfg(not(feature = "hf-tokenizer"))]
        TokenizerKind::HuggingFace => {
            bail!("huggingface tokenizer requested but docqa was built without `hf-tokenizer`")
        }
    }
}

/// Open the document registry for the configured storage mode.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or migrated.
pub async fn open_registry(config: &Config) -> anyhow::Result<SqliteStore> {
    let path = match config.storage.mode {
        StorageMode::Ephemeral => ":memory:",
        StorageMode::Durable => {
            let path = config.storage.sqlite_path.as_str();
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            path
        }
    };
    SqliteStore::new(path)
        .await
        .with_context(|| format!("failed to open document registry at {path}"))
}

/// Open the vector index for the configured storage mode.
///
/// # Errors
///
/// Returns an error if Qdrant is unreachable in durable mode.
pub async fn open_vector_store(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.storage.mode {
        StorageMode::Ephemeral => {
            tracing::warn!(
                "ephemeral storage: documents and vectors are kept in memory and must be \
                 re-uploaded after restart"
            );
            Ok(Arc::new(InMemoryVectorStore::new()))
        }
        StorageMode::Durable => {
            let url = &config.storage.qdrant_url;
            let ops = QdrantOps::new(url).map_err(|e| anyhow::anyhow!("qdrant client: {e}"))?;
            if let Err(e) = ops.health_check().await {
                bail!("qdrant at {url} is not reachable: {e}");
            }
            tracing::info!(url, "connected to qdrant");
            Ok(Arc::new(ops))
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::config::Secret;

    #[test]
    #[serial]
    fn config_path_priority() {
        unsafe { std::env::remove_var("DOCQA_CONFIG") };
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from("config/default.toml")
        );

        unsafe { std::env::set_var("DOCQA_CONFIG", "/etc/docqa.toml") };
        assert_eq!(resolve_config_path(None), PathBuf::from("/etc/docqa.toml"));
        assert_eq!(
            resolve_config_path(Some(Path::new("cli.toml"))),
            PathBuf::from("cli.toml")
        );
        unsafe { std::env::remove_var("DOCQA_CONFIG") };
    }

    #[test]
    fn create_provider_openai_requires_key() {
        let config = Config::default();
        let err = create_provider(&config).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn create_provider_openai() {
        let mut config = Config::default();
        config.secrets.openai_api_key = Some(Secret::new("sk-test"));
        config.llm.embed_batch_size = Some(10);
        let provider = create_provider(&config).unwrap();
        assert!(matches!(provider, AnyProvider::OpenAi(_)));
        assert_eq!(docqa_llm::LlmProvider::max_embed_batch(&provider), 10);
    }

    #[test]
    fn create_provider_ollama() {
        let mut config = Config::default();
        config.llm.provider = ProviderKind::Ollama;
        config.llm.base_url = "http://localhost:11434".into();
        config.llm.model = "llama3".into();
        let provider = create_provider(&config).unwrap();
        assert!(matches!(provider, AnyProvider::Ollama(_)));
        assert_eq!(docqa_llm::LlmProvider::name(&provider), "ollama");
    }

    #[test]
    fn approx_tokenizer_by_default() {
        let tokenizer = create_tokenizer(&Config::default()).unwrap();
        assert_eq!(tokenizer.name(), ApproxTokenizer.name());
    }

    #[tokio::test]
    async fn ephemeral_storage_uses_memory() {
        let config = Config::default();
        let store = open_vector_store(&config).await.unwrap();
        assert_eq!(store.backend(), "in-memory");
        let registry = open_registry(&config).await.unwrap();
        assert!(registry.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn durable_registry_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.mode = StorageMode::Durable;
        config.storage.sqlite_path = dir
            .path()
            .join("nested/docqa.db")
            .to_string_lossy()
            .into_owned();
        let registry = open_registry(&config).await.unwrap();
        registry.close().await;
        assert!(dir.path().join("nested/docqa.db").exists());
    }
}
