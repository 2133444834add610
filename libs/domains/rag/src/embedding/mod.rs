mod hashing;
mod openai;
mod provider;

pub use hashing::{HASHING_MODEL, HashingEmbeddingProvider};
pub use openai::{DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL, OpenAIEmbeddingProvider};
#[cfg(test)]
pub use provider::MockEmbeddingProvider;
pub use provider::{EmbeddingProvider, collection_spec};
