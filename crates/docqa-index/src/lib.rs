//! Document retrieval pipeline: chunking, embedding, indexing jobs, similarity
//! search with optional compression, and grounded answer assembly.

pub mod answer;
pub mod chunker;
pub mod collection;
pub mod compressor;
pub mod embedder;
pub mod error;
pub mod pipeline;
pub mod retriever;
pub mod tokenizer;

pub use answer::{Answer, AnswerAssembler, Citation};
pub use chunker::{Chunker, ChunkerConfig, TextChunk};
pub use collection::{CollectionNames, Scope};
pub use compressor::{CompressionMode, Compressor};
pub use embedder::Embedder;
pub use error::{IndexError, Result};
pub use pipeline::IngestPipeline;
pub use retriever::{QueryResult, RetrievalConfig, RetrievedChunk, Retriever};
pub use tokenizer::{ApproxTokenizer, Tokenizer};
