use std::sync::Arc;
use std::time::Instant;

use observability::RagMetrics;
use tracing::{info, instrument, warn};

use crate::chunker::{ChunkingParams, chunk_with};
use crate::embedding::{EmbeddingProvider, collection_spec};
use crate::error::{RagError, RagResult};
use crate::models::{
    CHUNK_INDEX_KEY, CollectionSpec, DOCUMENT_ID_KEY, DocumentId, IngestInput, IngestOutput,
    VectorRecord,
};
use crate::store::VectorStore;

/// Chunks, embeds and stores documents
#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IngestionService {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Collection this service writes to
    pub fn collection(&self) -> CollectionSpec {
        collection_spec(self.embedder.as_ref())
    }

    /// Replace the stored chunks of a document with a fresh ingestion of `text`.
    ///
    /// All chunk texts are embedded in one provider call. On provider failure
    /// the store is left untouched.
    #[instrument(
        skip(self, input),
        fields(document_id = %input.document_id, chars = input.text.chars().count())
    )]
    pub async fn ingest(&self, input: IngestInput) -> RagResult<IngestOutput> {
        let start = Instant::now();
        if input.document_id.is_empty() {
            return Err(RagError::InvalidQuery(
                "document_id must not be empty".to_string(),
            ));
        }
        let params = ChunkingParams::new(input.chunk_size, input.overlap)?;
        let chunks = chunk_with(&input.text, params);
        let spec = self.collection();

        if chunks.is_empty() {
            self.store.upsert(&spec, &input.document_id, vec![]).await?;
            info!(collection = %spec, "Ingested empty document");
            RagMetrics::record_ingest(&spec.name(), 0, start.elapsed());
            return Ok(IngestOutput {
                document_id: input.document_id,
                chunks_ingested: 0,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed(&texts, &spec.model)
            .await
            .inspect_err(|e| {
                warn!(error = %e, provider = %spec.provider, "Embedding failed, document not stored");
                RagMetrics::record_provider_error(&spec.provider, e.kind());
            })?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::invalid_response(format!(
                "embedding provider returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let records = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (chunk, embedding))| {
                let mut metadata = input.base_metadata.clone();
                metadata.insert(DOCUMENT_ID_KEY.to_string(), input.document_id.to_string());
                metadata.insert(CHUNK_INDEX_KEY.to_string(), index.to_string());
                VectorRecord::new(index, embedding, chunk.with_metadata(metadata))
            })
            .collect::<Vec<_>>();
        let chunks_ingested = records.len();

        self.store
            .upsert(&spec, &input.document_id, records)
            .await?;

        info!(
            collection = %spec,
            chunks = chunks_ingested,
            duration_ms = start.elapsed().as_millis() as u64,
            "Ingested document"
        );
        RagMetrics::record_ingest(&spec.name(), chunks_ingested, start.elapsed());

        Ok(IngestOutput {
            document_id: input.document_id,
            chunks_ingested,
        })
    }

    /// Remove a document from the active collection
    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn delete(&self, document_id: &DocumentId) -> RagResult<bool> {
        let removed = self.store.delete(&self.collection(), document_id).await?;
        info!(removed, "Deleted document");
        Ok(removed)
    }
}
