//! RAG HTTP Service
//!
//! Serves document ingestion, similarity search and grounded chat over REST + SSE.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   ↓ (JSON / text/event-stream)
//! rate_limit → metrics → axum handlers (domain_rag::handlers)
//!   ↓
//! RagService (domain layer)
//!   ↓
//! ┌──────────────────┬───────────────────┬────────────────────┐
//! │ InMemoryVector   │ EmbeddingProvider │ CompletionProvider │
//! │ Store            │                   │                    │
//! └──────────────────┴───────────────────┴────────────────────┘
//!                           ↓                    ↓
//!                      OpenAI API (or in-process fallbacks)
//! ```
//!
//! ## Modules
//!
//! - `config`: Environment-driven configuration
//! - `rate_limit`: Per-client token buckets
//! - `server`: Server initialization and lifecycle

pub mod config;
pub mod rate_limit;
pub mod server;

pub use server::run;
