mod memory;

pub use memory::InMemoryVectorStore;

use async_trait::async_trait;

use crate::error::RagResult;
use crate::models::{CollectionInfo, CollectionSpec, DocumentId, Metadata, SearchMatch, VectorRecord};

/// Storage port for chunk embeddings
///
/// A store hosts isolated collections, one per embedding provider/model pair.
/// Any backend must rank results by descending score, then ascending
/// `document_id`, then ascending `chunk_index`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace every stored chunk of `document_id` with `vectors`.
    ///
    /// Creates the collection on first write. An empty `vectors` removes the
    /// document. Nothing is written if any record fails validation.
    async fn upsert(
        &self,
        collection: &CollectionSpec,
        document_id: &DocumentId,
        vectors: Vec<VectorRecord>,
    ) -> RagResult<()>;

    /// Return at most `top_k` matches for `query`, best first
    async fn search(
        &self,
        collection: &CollectionSpec,
        query: &[f32],
        top_k: usize,
        filter: Option<Metadata>,
    ) -> RagResult<Vec<SearchMatch>>;

    /// Remove a document. Returns whether anything was removed.
    async fn delete(&self, collection: &CollectionSpec, document_id: &DocumentId)
    -> RagResult<bool>;

    async fn list_collections(&self) -> RagResult<Vec<CollectionInfo>>;

    /// Number of distinct documents in a collection
    async fn document_count(&self, collection: &CollectionSpec) -> RagResult<usize>;
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Dot product; equals cosine similarity for unit vectors
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
