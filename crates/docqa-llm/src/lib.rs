//! Completion and embedding provider abstraction.
//!
//! The retrieval pipeline treats both language model capabilities as opaque
//! collaborators: [`LlmProvider::chat`] for grounded answer generation and
//! [`LlmProvider::embed_batch`] for vectorizing chunks and questions.

pub mod any;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;

pub use any::AnyProvider;
pub use error::LlmError;
pub use provider::{LlmProvider, Message, Role};
pub use retry::{RetryPolicy, with_backoff};
