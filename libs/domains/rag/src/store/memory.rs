use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{VectorStore, dot, l2_normalize};
use crate::error::{RagError, RagResult};
use crate::models::{
    CollectionInfo, CollectionSpec, DocumentId, Metadata, SearchMatch, StoredVector, VectorRecord,
};

type CollectionKey = (String, String);

fn key_of(spec: &CollectionSpec) -> CollectionKey {
    (spec.provider.clone(), spec.model.clone())
}

#[derive(Debug)]
struct Collection {
    spec: CollectionSpec,
    /// Chunks of each document, position == chunk_index
    documents: BTreeMap<DocumentId, Vec<StoredVector>>,
}

impl Collection {
    fn new(spec: CollectionSpec) -> Self {
        Self {
            spec,
            documents: BTreeMap::new(),
        }
    }

    fn vector_count(&self) -> usize {
        self.documents.values().map(Vec::len).sum()
    }

    fn info(&self) -> CollectionInfo {
        CollectionInfo {
            spec: self.spec.clone(),
            documents: self.documents.len(),
            vectors: self.vector_count(),
        }
    }
}

/// Heap entry ordered so the *worst* candidate sits on top of the max-heap
struct Candidate<'a> {
    score: f32,
    vector: &'a StoredVector,
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.vector.document_id.cmp(&other.vector.document_id))
            .then_with(|| self.vector.chunk_index.cmp(&other.vector.chunk_index))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

/// Process-local vector store.
///
/// Exhaustive cosine scan with a bounded top-K heap. Each collection sits
/// behind its own `RwLock`, so a document replacement is never observed
/// half-applied and unrelated collections never contend.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<CollectionKey, Arc<RwLock<Collection>>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn collection(&self, spec: &CollectionSpec) -> Option<Arc<RwLock<Collection>>> {
        self.collections.read().await.get(&key_of(spec)).cloned()
    }

    async fn collection_or_create(&self, spec: &CollectionSpec) -> Arc<RwLock<Collection>> {
        if let Some(existing) = self.collection(spec).await {
            return existing;
        }

        let mut collections = self.collections.write().await;
        collections
            .entry(key_of(spec))
            .or_insert_with(|| {
                debug!(collection = %spec, "Creating collection");
                Arc::new(RwLock::new(Collection::new(spec.clone())))
            })
            .clone()
    }
}

fn validate_spec(spec: &CollectionSpec) -> RagResult<()> {
    if spec.dim == 0 {
        return Err(RagError::DimensionMismatch {
            expected: 1,
            actual: 0,
        });
    }
    Ok(())
}

fn check_dim(expected: usize, actual: usize) -> RagResult<()> {
    if expected != actual {
        return Err(RagError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Validates and normalizes records, returning them ordered by chunk index
fn prepare(
    spec: &CollectionSpec,
    document_id: &DocumentId,
    mut vectors: Vec<VectorRecord>,
) -> RagResult<Vec<StoredVector>> {
    for record in &vectors {
        check_dim(spec.dim, record.embedding.len())?;
    }

    vectors.sort_by_key(|r| r.chunk_index);
    for (expected, record) in vectors.iter().enumerate() {
        if record.chunk_index != expected {
            return Err(RagError::InvalidQuery(format!(
                "chunk indices for document '{}' must be contiguous from 0, found {} at position {}",
                document_id, record.chunk_index, expected
            )));
        }
    }

    Ok(vectors
        .into_iter()
        .map(|record| {
            let mut embedding = record.embedding;
            l2_normalize(&mut embedding);
            StoredVector {
                document_id: document_id.clone(),
                chunk_index: record.chunk_index,
                embedding,
                chunk: record.chunk,
            }
        })
        .collect())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        collection: &CollectionSpec,
        document_id: &DocumentId,
        vectors: Vec<VectorRecord>,
    ) -> RagResult<()> {
        validate_spec(collection)?;
        if let Some(existing) = self.collection(collection).await {
            check_dim(existing.read().await.spec.dim, collection.dim)?;
        }
        let stored = prepare(collection, document_id, vectors)?;

        let handle = self.collection_or_create(collection).await;
        let mut guard = handle.write().await;
        check_dim(guard.spec.dim, collection.dim)?;

        if stored.is_empty() {
            guard.documents.remove(document_id);
        } else {
            guard.documents.insert(document_id.clone(), stored);
        }

        debug!(
            collection = %collection,
            document_id = %document_id,
            documents = guard.documents.len(),
            "Upserted document"
        );
        Ok(())
    }

    async fn search(
        &self,
        collection: &CollectionSpec,
        query: &[f32],
        top_k: usize,
        filter: Option<Metadata>,
    ) -> RagResult<Vec<SearchMatch>> {
        if top_k == 0 {
            return Err(RagError::InvalidQuery("top_k must be greater than 0".to_string()));
        }

        let handle = self
            .collection(collection)
            .await
            .ok_or_else(|| RagError::CollectionNotFound(collection.name()))?;
        let guard = handle.read().await;
        check_dim(guard.spec.dim, collection.dim)?;
        check_dim(guard.spec.dim, query.len())?;

        let mut query = query.to_vec();
        l2_normalize(&mut query);

        let mut heap: BinaryHeap<Candidate<'_>> = BinaryHeap::with_capacity(top_k.min(256) + 1);
        for vector in guard.documents.values().flatten() {
            if filter.as_ref().is_some_and(|f| !vector.chunk.matches(f)) {
                continue;
            }
            heap.push(Candidate {
                score: dot(&query, &vector.embedding),
                vector,
            });
            if heap.len() > top_k {
                heap.pop();
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|candidate| SearchMatch {
                document_id: candidate.vector.document_id.clone(),
                chunk_index: candidate.vector.chunk_index,
                chunk: candidate.vector.chunk.clone(),
                score: candidate.score,
            })
            .collect())
    }

    async fn delete(
        &self,
        collection: &CollectionSpec,
        document_id: &DocumentId,
    ) -> RagResult<bool> {
        let Some(handle) = self.collection(collection).await else {
            return Ok(false);
        };
        let removed = handle.write().await.documents.remove(document_id).is_some();
        Ok(removed)
    }

    async fn list_collections(&self) -> RagResult<Vec<CollectionInfo>> {
        let handles: Vec<_> = self.collections.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            infos.push(handle.read().await.info());
        }
        infos.sort_by(|a, b| {
            (&a.spec.provider, &a.spec.model).cmp(&(&b.spec.provider, &b.spec.model))
        });
        Ok(infos)
    }

    async fn document_count(&self, collection: &CollectionSpec) -> RagResult<usize> {
        let handle = self
            .collection(collection)
            .await
            .ok_or_else(|| RagError::CollectionNotFound(collection.name()))?;
        let count = handle.read().await.documents.len();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn spec(dim: usize) -> CollectionSpec {
        CollectionSpec::new("test", "unit", dim)
    }

    fn record(index: usize, embedding: Vec<f32>, text: &str) -> VectorRecord {
        VectorRecord::new(index, embedding, Chunk::new(text))
    }

    #[tokio::test]
    async fn test_rejects_zero_dimension() {
        let store = InMemoryVectorStore::new();
        let result = store
            .upsert(&spec(0), &"doc".into(), vec![record(0, vec![], "x")])
            .await;
        assert!(matches!(result, Err(RagError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_rejects_gapped_chunk_indices() {
        let store = InMemoryVectorStore::new();
        let result = store
            .upsert(
                &spec(2),
                &"doc".into(),
                vec![record(0, vec![1.0, 0.0], "a"), record(2, vec![0.0, 1.0], "b")],
            )
            .await;
        assert!(matches!(result, Err(RagError::InvalidQuery(_))));
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_collection_with_different_dim_is_rejected() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(&spec(2), &"doc".into(), vec![record(0, vec![1.0, 0.0], "a")])
            .await
            .unwrap();

        let result = store
            .upsert(&spec(3), &"doc".into(), vec![record(0, vec![1.0, 0.0, 0.0], "a")])
            .await;
        assert!(matches!(
            result,
            Err(RagError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_zero_vector_scores_zero() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(&spec(2), &"zero".into(), vec![record(0, vec![0.0, 0.0], "z")])
            .await
            .unwrap();

        let matches = store.search(&spec(2), &[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, 0.0);
    }

    #[tokio::test]
    async fn test_heap_keeps_best_candidates() {
        let store = InMemoryVectorStore::new();
        for (i, y) in [0.9f32, 0.1, 0.5, 0.7, 0.3].iter().enumerate() {
            store
                .upsert(
                    &spec(2),
                    &format!("doc-{i}").into(),
                    vec![record(0, vec![1.0 - y, *y], "t")],
                )
                .await
                .unwrap();
        }

        let matches = store.search(&spec(2), &[0.0, 1.0], 2, None).await.unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.document_id.as_str()).collect();
        assert_eq!(ids, vec!["doc-0", "doc-3"]);
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let store = InMemoryVectorStore::new();
        assert!(!store.delete(&spec(2), &"missing".into()).await.unwrap());

        store
            .upsert(&spec(2), &"doc".into(), vec![record(0, vec![1.0, 0.0], "a")])
            .await
            .unwrap();
        assert!(!store.delete(&spec(2), &"missing".into()).await.unwrap());
        assert!(store.delete(&spec(2), &"doc".into()).await.unwrap());
        assert_eq!(store.document_count(&spec(2)).await.unwrap(), 0);
    }
}
