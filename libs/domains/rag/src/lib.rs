//! RAG Domain Library
//!
//! Retrieval-augmented generation over an in-process vector index: documents
//! are chunked, embedded and stored per collection; questions are embedded,
//! matched against the index and answered by a chat model grounded in the
//! retrieved passages, blocking or streamed.
//!
//! # Architecture
//!
//! ```text
//!                    ┌────────────────┐
//!                    │   RagService   │  ← ask / ask_stream / ingest / search
//!                    └───────┬────────┘
//!          ┌─────────────────┼──────────────────┐
//! ┌────────▼────────┐ ┌──────▼──────────┐ ┌─────▼───────────┐
//! │IngestionService │ │RetrievalService │ │   ChatService   │
//! │  (chunker)      │ │  (context)      │ │  (ChatStream)   │
//! └───┬─────────┬───┘ └───┬─────────┬───┘ └────────┬────────┘
//!     │         │         │         │              │
//! ┌───▼─────────▼─────────▼───┐ ┌───▼─────────┐ ┌──▼─────────────────┐
//! │    VectorStore (trait)    │ │ Embedding   │ │ CompletionProvider │
//! │    InMemoryVectorStore    │ │ Provider    │ │  OpenAI / Scripted │
//! └───────────────────────────┘ │ OpenAI /    │ └────────────────────┘
//!                               │ Hashing     │
//!                               └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use domain_rag::{
//!     AskRequest, HashingEmbeddingProvider, InMemoryVectorStore, Metadata, RagConfig,
//!     RagService, ScriptedCompletionProvider,
//! };
//!
//! # async fn example() -> Result<(), domain_rag::RagError> {
//! let service = RagService::new(
//!     RagConfig::default(),
//!     Arc::new(InMemoryVectorStore::new()),
//!     Arc::new(HashingEmbeddingProvider::default()),
//!     Arc::new(ScriptedCompletionProvider::new(["Rust is a language [1]."])),
//! );
//!
//! service
//!     .ingest_text("rust", "Rust is a systems programming language.", Metadata::new())
//!     .await?;
//! let response = service.ask(AskRequest::new("What is Rust?")).await?;
//! println!("{} ({} sources)", response.answer, response.sources.len());
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod chunker;
pub mod completion;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod handlers;
pub mod ingestion;
pub mod models;
pub mod openai;
pub mod parser;
pub mod prompts;
pub mod retrieval;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use chat::{ChatService, ChatStream};
pub use chunker::{ChunkingParams, chunk};
pub use completion::{
    CompletionProvider, DeltaSink, OpenAIChatProvider, ScriptedCompletionProvider,
};
pub use config::RagConfig;
pub use context::{render_context, to_context_sources};
pub use embedding::{EmbeddingProvider, HashingEmbeddingProvider, OpenAIEmbeddingProvider};
pub use error::{RagError, RagResult};
pub use handlers::RagApiDoc;
pub use ingestion::IngestionService;
pub use models::{
    ChatEvent, ChatInput, ChatMessage, ChatOutput, ChatRole, ChatUsage, Chunk, CollectionInfo,
    CollectionSpec, ContextSource, DocumentId, HealthStatus, IngestInput, IngestOutput, Metadata,
    ProviderHealth, SearchInput, SearchMatch, SearchOutput, VectorRecord,
};
pub use openai::OpenAIConfig;
pub use parser::{OutputParser, ParsedOutput};
pub use retrieval::RetrievalService;
pub use service::{AskRequest, AskResponse, RagService};
pub use store::{InMemoryVectorStore, VectorStore};
