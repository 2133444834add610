use std::sync::Arc;
use std::time::Instant;

use observability::RagMetrics;
use tracing::{debug, instrument, warn};

use crate::embedding::{EmbeddingProvider, collection_spec};
use crate::error::{RagError, RagResult};
use crate::models::{SearchInput, SearchOutput};
use crate::store::VectorStore;

/// Embeds queries and runs similarity search against the active collection
#[derive(Clone)]
pub struct RetrievalService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalService {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    #[instrument(skip(self, input), fields(top_k = input.top_k, filtered = input.filter.is_some()))]
    pub async fn search(&self, input: SearchInput) -> RagResult<SearchOutput> {
        let start = Instant::now();
        if input.top_k <= 0 {
            return Err(RagError::InvalidQuery(format!(
                "top_k must be greater than 0, got {}",
                input.top_k
            )));
        }
        let top_k = usize::try_from(input.top_k)
            .map_err(|_| RagError::InvalidQuery(format!("top_k out of range: {}", input.top_k)))?;

        let spec = collection_spec(self.embedder.as_ref());
        let query = self
            .embedder
            .embed(std::slice::from_ref(&input.query_text), &spec.model)
            .await
            .inspect_err(|e| {
                warn!(error = %e, provider = %spec.provider, "Query embedding failed");
                RagMetrics::record_provider_error(&spec.provider, e.kind());
            })?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::invalid_response("no embedding returned for query"))?;

        let matches = self
            .store
            .search(&spec, &query, top_k, input.filter)
            .await?;

        debug!(
            collection = %spec,
            results = matches.len(),
            best_score = matches.first().map(|m| m.score),
            "Search completed"
        );
        RagMetrics::record_search(&spec.name(), matches.len(), start.elapsed());

        Ok(SearchOutput { matches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingProvider;
    use crate::models::{Chunk, Metadata, SearchMatch};
    use crate::store::MockVectorStore;

    fn mock_embedder() -> MockEmbeddingProvider {
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_provider_name().return_const("mock".to_string());
        embedder.expect_model().return_const("mock-embed".to_string());
        embedder.expect_dimension().return_const(2usize);
        embedder
    }

    #[tokio::test]
    async fn test_non_positive_top_k_rejected_before_embedding() {
        let mut embedder = mock_embedder();
        embedder.expect_embed().never();
        let mut store = MockVectorStore::new();
        store.expect_search().never();

        let service = RetrievalService::new(Arc::new(store), Arc::new(embedder));
        for top_k in [0, -3] {
            let err = service.search(SearchInput::new("q", top_k)).await.unwrap_err();
            assert!(matches!(err, RagError::InvalidQuery(_)));
        }
    }

    #[tokio::test]
    async fn test_search_embeds_query_once_and_forwards_filter() {
        let mut embedder = mock_embedder();
        embedder
            .expect_embed()
            .withf(|texts, _| texts.len() == 1 && texts[0].is_empty())
            .times(1)
            .returning(|_, _| Ok(vec![vec![0.6, 0.8]]));

        let mut store = MockVectorStore::new();
        store
            .expect_search()
            .withf(|spec, query, top_k, filter| {
                spec.dim == 2
                    && query.to_vec() == vec![0.6, 0.8]
                    && *top_k == 3
                    && filter
                        .as_ref()
                        .is_some_and(|f| f.get("lang").map(String::as_str) == Some("en"))
            })
            .returning(|_, _, _, _| {
                Ok(vec![SearchMatch {
                    document_id: "a".into(),
                    chunk_index: 0,
                    chunk: Chunk::new("alpha"),
                    score: 0.9,
                }])
            });

        let mut filter = Metadata::new();
        filter.insert("lang".into(), "en".into());
        let service = RetrievalService::new(Arc::new(store), Arc::new(embedder));
        let output = service
            .search(SearchInput::new("", 3).with_filter(filter))
            .await
            .unwrap();
        assert_eq!(output.matches.len(), 1);
        assert_eq!(output.matches[0].document_id.as_str(), "a");
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let mut embedder = mock_embedder();
        embedder.expect_embed().returning(|_, _| Ok(vec![vec![1.0, 0.0]]));
        let mut store = MockVectorStore::new();
        store
            .expect_search()
            .returning(|spec, _, _, _| Err(RagError::CollectionNotFound(spec.name())));

        let service = RetrievalService::new(Arc::new(store), Arc::new(embedder));
        let err = service.search(SearchInput::new("q", 1)).await.unwrap_err();
        assert!(matches!(err, RagError::CollectionNotFound(name) if name == "mock:mock-embed"));
    }
}
