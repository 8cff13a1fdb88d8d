//! Test-only mock LLM provider.
//!
//! Embeddings are a hashed bag of words, so texts sharing vocabulary land close
//! together under cosine similarity and retrieval tests stay deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

pub const MOCK_DIMENSION: usize = 64;

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<String>>>,
    prompts: Arc<Mutex<Vec<Vec<Message>>>>,
    chat_calls: Arc<AtomicUsize>,
    embed_calls: Arc<AtomicUsize>,
    transient_embed_failures: Arc<AtomicUsize>,
    pub default_response: String,
    pub dimension: usize,
    pub max_batch: usize,
    pub fail_chat: bool,
    pub fail_embed: bool,
    /// Milliseconds to sleep before every call.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            chat_calls: Arc::new(AtomicUsize::new(0)),
            embed_calls: Arc::new(AtomicUsize::new(0)),
            transient_embed_failures: Arc::new(AtomicUsize::new(0)),
            default_response: "mock response".into(),
            dimension: MOCK_DIMENSION,
            max_batch: 16,
            fail_chat: false,
            fail_embed: false,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            fail_embed: true,
            ..Self::default()
        }
    }

    /// The next `count` embedding calls fail with a rate-limit error.
    #[must_use]
    pub fn with_transient_embed_failures(self, count: usize) -> Self {
        self.transient_embed_failures.store(count, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Every message list passed to [`LlmProvider::chat`], oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        hashed_bag_of_words(text, self.dimension)
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
    }
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        self.pause().await;
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Ok(next.unwrap_or_else(|| self.default_response.clone()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if texts.len() > self.max_batch {
            return Err(LlmError::Other(format!(
                "batch of {} exceeds mock limit {}",
                texts.len(),
                self.max_batch
            )));
        }
        if self.fail_embed {
            return Err(LlmError::Api {
                provider: "mock",
                status: 401,
                message: "mock embedding rejected".into(),
            });
        }
        let remaining = self
            .transient_embed_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            return Err(LlmError::RateLimited { retry_after: None });
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn max_embed_batch(&self) -> usize {
        self.max_batch
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-chat"
    }

    fn embedding_model(&self) -> &str {
        "mock-embed"
    }
}

fn hashed_bag_of_words(text: &str, dimension: usize) -> Vec<f32> {
    let dimension = dimension.max(1);
    let mut vector = vec![0.0_f32; dimension];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let lower = word.to_lowercase();
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in lower.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        #[allow(clippy::cast_possible_truncation)]
        let slot = (hash % dimension as u64) as usize;
        vector[slot] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    } else {
        vector[0] = 1.0;
    }
    vector
}
