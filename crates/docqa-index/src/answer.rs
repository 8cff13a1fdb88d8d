//! Grounded prompt construction and answer generation with citations.

use std::fmt::Write;
use std::sync::Arc;

use docqa_llm::{LlmProvider, Message, RetryPolicy, with_backoff};
use docqa_memory::DocumentId;
use serde::Serialize;

use crate::error::{IndexError, Result};
use crate::retriever::{QueryResult, RetrievedChunk};
use crate::tokenizer::Tokenizer;

pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 6000;

pub const NO_CONTEXT_ANSWER: &str = "I could not find any passages in the indexed documents \
that support an answer to this question. Try rephrasing it, widening the scope to the \
whole knowledge base, or uploading the relevant document.";

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a specialized Model Risk Management (MRM) assistant. You answer questions about \
model risk management, model validation, model governance, risk assessment and regulatory \
compliance (SR 11-7, Basel III, CCAR/DFAST and similar guidance).

Rules:
- Use only the information inside the <context> sources supplied with the question.
- Do not add general knowledge that is not in the sources.
- If the sources do not contain the answer, say that the available documents do not cover it.
- Reference the source documents you rely on by name.
- Use precise, professional MRM terminology.";

/// Overhead per source block for tags and attributes.
const SOURCE_TAG_TOKENS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub document_id: DocumentId,
    pub document_name: String,
    pub chunk_indices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
    /// Documents whose chunks were supplied to the model, in rank order.
    pub citations: Vec<Citation>,
    /// `false` when no context was available and generation was skipped.
    pub grounded: bool,
    pub context_tokens: usize,
}

impl Answer {
    #[must_use]
    pub fn no_context() -> Self {
        Self {
            text: NO_CONTEXT_ANSWER.to_owned(),
            citations: Vec::new(),
            grounded: false,
            context_tokens: 0,
        }
    }
}

/// Messages ready for the completion provider plus the chunks they contain.
#[derive(Debug)]
pub struct PreparedPrompt<'a> {
    pub messages: Vec<Message>,
    pub supplied: Vec<&'a RetrievedChunk>,
    pub context_tokens: usize,
}

pub struct AnswerAssembler<P: LlmProvider> {
    provider: Arc<P>,
    tokenizer: Arc<dyn Tokenizer>,
    system_prompt: String,
    max_context_tokens: usize,
    retry: RetryPolicy,
}

impl<P: LlmProvider> AnswerAssembler<P> {
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        tokenizer: Arc<dyn Tokenizer>,
        max_context_tokens: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            tokenizer,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_context_tokens,
            retry,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Pack chunks into the context budget in rank order and build the messages.
    ///
    /// Packing stops at the first chunk that does not fit; it and every later
    /// chunk are left out.
    #[must_use]
    pub fn prepare<'a>(&self, question: &str, result: &'a QueryResult) -> PreparedPrompt<'a> {
        let mut supplied = Vec::new();
        let mut context = String::from("<context>\n");
        let mut used = 0;

        for chunk in &result.chunks {
            let cost = self.tokenizer.count(&chunk.text) + SOURCE_TAG_TOKENS;
            if used + cost > self.max_context_tokens {
                break;
            }
            used += cost;
            let _ = writeln!(
                context,
                "<source document=\"{}\" id=\"{}\" chunk=\"{}\">\n{}\n</source>",
                escape_attr(&chunk.document_name),
                escape_attr(chunk.document_id.as_str()),
                chunk.chunk_index,
                chunk.text.trim(),
            );
            supplied.push(chunk);
        }
        context.push_str("</context>");

        let user = format!(
            "{context}\n\nAnswer the question using only the sources above and name the \
             documents you rely on.\n\nQuestion: {question}"
        );
        PreparedPrompt {
            messages: vec![Message::system(self.system_prompt.clone()), Message::user(user)],
            supplied,
            context_tokens: used,
        }
    }

    /// Generate a grounded answer for `question` from `result`.
    ///
    /// With nothing to supply the provider is not called and
    /// [`Answer::no_context`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Completion`] if generation fails after retries.
    pub async fn answer(&self, question: &str, result: &QueryResult) -> Result<Answer> {
        let prompt = self.prepare(question, result);
        if prompt.supplied.is_empty() {
            tracing::info!("no supporting context, skipping generation");
            return Ok(Answer::no_context());
        }

        let text = with_backoff("chat", &self.retry, || {
            self.provider.chat(&prompt.messages)
        })
        .await
        .map_err(IndexError::Completion)?;

        tracing::info!(
            sources = prompt.supplied.len(),
            context_tokens = prompt.context_tokens,
            "answer generated"
        );
        Ok(Answer {
            text,
            citations: citations(&prompt.supplied),
            grounded: true,
            context_tokens: prompt.context_tokens,
        })
    }
}

fn citations(supplied: &[&RetrievedChunk]) -> Vec<Citation> {
    let mut out: Vec<Citation> = Vec::new();
    for chunk in supplied {
        match out.iter_mut().find(|c| c.document_id == chunk.document_id) {
            Some(c) => c.chunk_indices.push(chunk.chunk_index),
            None => out.push(Citation {
                document_id: chunk.document_id.clone(),
                document_name: chunk.document_name.clone(),
                chunk_indices: vec![chunk.chunk_index],
            }),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}
