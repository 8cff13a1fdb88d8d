//! Re-scoring of retrieved candidates against the literal question.

use std::collections::HashSet;
use std::sync::Arc;

use docqa_llm::{LlmProvider, Message, RetryPolicy, with_backoff};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::retriever::RetrievedChunk;

/// Weight of the lexical overlap when blending with the vector score.
const KEYWORD_WEIGHT: f32 = 0.5;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "what", "which", "who", "how", "does", "did", "was", "were",
    "this", "that", "with", "from", "into", "about", "under", "there", "their", "have", "has",
    "can", "should", "would", "could", "not", "any", "all", "its", "our", "your", "when",
    "where", "why", "per", "also",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    #[default]
    None,
    Keyword,
    Llm,
}

impl CompressionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Keyword => "keyword",
            Self::Llm => "llm",
        }
    }
}

pub struct Compressor<P: LlmProvider> {
    mode: CompressionMode,
    provider: Arc<P>,
    relevance_threshold: f32,
    retry: RetryPolicy,
}

impl<P: LlmProvider> Compressor<P> {
    #[must_use]
    pub fn new(
        mode: CompressionMode,
        provider: Arc<P>,
        relevance_threshold: f32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            mode,
            provider,
            relevance_threshold,
            retry,
        }
    }

    #[must_use]
    pub fn mode(&self) -> CompressionMode {
        self.mode
    }

    /// Re-score candidates and drop those below the relevance threshold.
    ///
    /// With [`CompressionMode::None`] candidates pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Completion`] if LLM rating fails after retries.
    pub async fn compress(
        &self,
        question: &str,
        candidates: Vec<RetrievedChunk>,
    ) -> Result<Vec<RetrievedChunk>> {
        let scored = match self.mode {
            CompressionMode::None => return Ok(candidates),
            CompressionMode::Keyword => keyword_rescore(question, candidates),
            CompressionMode::Llm => self.llm_rescore(question, candidates).await?,
        };
        Ok(scored
            .into_iter()
            .filter(|c| c.score >= self.relevance_threshold)
            .collect())
    }

    async fn llm_rescore(
        &self,
        question: &str,
        candidates: Vec<RetrievedChunk>,
    ) -> Result<Vec<RetrievedChunk>> {
        let ratings = futures::future::try_join_all(
            candidates
                .iter()
                .map(|c| self.rate(question, &c.text)),
        )
        .await?;

        Ok(candidates
            .into_iter()
            .zip(ratings)
            .map(|(mut c, rating)| {
                c.score = f32::from(rating) / 10.0;
                c
            })
            .collect())
    }

    async fn rate(&self, question: &str, passage: &str) -> Result<u8> {
        let messages = [
            Message::system(
                "You rate how useful a passage is for answering a question. \
                 Reply with a single integer from 0 (irrelevant) to 10 (answers it directly).",
            ),
            Message::user(format!("Question: {question}\n\nPassage:\n{passage}\n\nRating:")),
        ];
        let reply = with_backoff("relevance_rating", &self.retry, || {
            self.provider.chat(&messages)
        })
        .await
        .map_err(IndexError::Completion)?;

        Ok(parse_rating(&reply).unwrap_or_else(|| {
            tracing::warn!(reply = %reply, "unparseable relevance rating, treating as 0");
            0
        }))
    }
}

/// First integer in the reply, clamped to 0..=10.
fn parse_rating(reply: &str) -> Option<u8> {
    let digits: String = reply
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse::<u32>().ok().map(|n| u8::try_from(n.min(10)).unwrap_or(10))
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 || w.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn overlap_ratio(query_terms: &HashSet<String>, chunk_terms: &HashSet<String>) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    query_terms.intersection(chunk_terms).count() as f32 / query_terms.len() as f32
}

/// Blend vector similarity with the share of question terms found in the chunk.
fn keyword_rescore(question: &str, candidates: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let query_terms = terms(question);
    candidates
        .into_iter()
        .map(|mut c| {
            let overlap = overlap_ratio(&query_terms, &terms(&c.text));
            c.score = (1.0 - KEYWORD_WEIGHT) * c.vector_score + KEYWORD_WEIGHT * overlap;
            c
        })
        .collect()
}
