//! Configuration, startup wiring and the document knowledge base service.

pub mod bootstrap;
pub mod config;
pub mod service;

pub use config::Config;
pub use service::{CollectionStats, IndexStats, KnowledgeBase};
