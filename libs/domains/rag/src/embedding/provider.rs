use async_trait::async_trait;

use crate::error::RagResult;
use crate::models::{CollectionSpec, ProviderHealth};

/// Trait for embedding generation providers
///
/// Implementations return exactly one vector per input text, in input order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider identifier, e.g. "openai"
    fn provider_name(&self) -> String;

    /// Model used when callers do not ask for another one
    fn model(&self) -> String;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed `texts` with `model`
    async fn embed(&self, texts: &[String], model: &str) -> RagResult<Vec<Vec<f32>>>;

    async fn health(&self) -> ProviderHealth;
}

/// Collection the provider's vectors belong to
pub fn collection_spec(provider: &dyn EmbeddingProvider) -> CollectionSpec {
    CollectionSpec::new(
        provider.provider_name(),
        provider.model(),
        provider.dimension(),
    )
}
