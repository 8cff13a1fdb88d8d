//! Batched, retried embedding with shape validation.

use std::sync::Arc;

use docqa_llm::{LlmError, LlmProvider, RetryPolicy, with_backoff};

use crate::error::{IndexError, Result};

pub struct Embedder<P: LlmProvider> {
    provider: Arc<P>,
    retry: RetryPolicy,
}

impl<P: LlmProvider> Clone for Embedder<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            retry: self.retry,
        }
    }
}

impl<P: LlmProvider> Embedder<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// One vector per input, in input order.
    ///
    /// Inputs are split into batches no larger than the provider accepts; each batch
    /// is retried on transient errors. Nothing is returned unless every batch succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Embedding`] if a batch fails after retries, the provider
    /// returns the wrong number of vectors, or the vector dimensions disagree.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.provider.max_embed_batch().max(1);
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(batch_size).enumerate() {
            let embedded = with_backoff("embed_batch", &self.retry, || {
                self.provider.embed_batch(batch)
            })
            .await
            .map_err(IndexError::Embedding)?;

            if embedded.len() != batch.len() {
                return Err(IndexError::Embedding(LlmError::BatchMismatch {
                    expected: batch.len(),
                    actual: embedded.len(),
                }));
            }
            tracing::debug!(batch = i, size = batch.len(), "embedded batch");
            vectors.extend(embedded);
        }

        check_dimensions(&vectors)?;
        Ok(vectors)
    }

    /// # Errors
    ///
    /// Returns [`IndexError::Embedding`] if the provider call fails after retries.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_owned()]).await?;
        vectors.pop().ok_or(IndexError::Embedding(LlmError::BatchMismatch {
            expected: 1,
            actual: 0,
        }))
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }
}

fn check_dimensions(vectors: &[Vec<f32>]) -> Result<()> {
    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let dim = first.len();
    if dim == 0 {
        return Err(IndexError::Embedding(LlmError::Other(
            "provider returned an empty embedding".into(),
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(IndexError::Embedding(LlmError::Other(format!(
            "inconsistent embedding dimensions: {dim} and {}",
            bad.len()
        ))));
    }
    Ok(())
}
