//! Retrieval and generation metrics.

use metrics::{counter, histogram};
use std::time::Duration;

/// How a chat exchange ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl ChatOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatOutcome::Completed => "completed",
            ChatOutcome::Failed => "failed",
            ChatOutcome::Cancelled => "cancelled",
        }
    }
}

/// RAG metrics recorder
pub struct RagMetrics;

impl RagMetrics {
    /// Record a finished document ingestion
    pub fn record_ingest(collection: &str, chunks: usize, duration: Duration) {
        counter!("rag_documents_ingested_total", "collection" => collection.to_string())
            .increment(1);
        counter!("rag_chunks_ingested_total", "collection" => collection.to_string())
            .increment(chunks as u64);
        histogram!("rag_ingest_duration_seconds", "collection" => collection.to_string())
            .record(duration.as_secs_f64());

        tracing::debug!(
            collection = collection,
            chunks = chunks,
            duration_ms = duration.as_millis() as u64,
            "Recorded ingestion"
        );
    }

    /// Record a similarity search and its result count
    pub fn record_search(collection: &str, results: usize, duration: Duration) {
        counter!("rag_searches_total", "collection" => collection.to_string()).increment(1);
        histogram!("rag_search_duration_seconds", "collection" => collection.to_string())
            .record(duration.as_secs_f64());
        histogram!("rag_search_results").record(results as f64);
    }

    /// Record a chat exchange; `mode` is "blocking" or "stream"
    pub fn record_chat(mode: &'static str, outcome: ChatOutcome) {
        counter!(
            "rag_chat_requests_total",
            "mode" => mode,
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    pub fn record_tokens(provider: &str, prompt_tokens: u32, completion_tokens: u32) {
        counter!("rag_completion_tokens_total", "provider" => provider.to_string(), "type" => "prompt")
            .increment(u64::from(prompt_tokens));
        counter!("rag_completion_tokens_total", "provider" => provider.to_string(), "type" => "completion")
            .increment(u64::from(completion_tokens));
    }

    pub fn record_provider_error(provider: &str, kind: &'static str) {
        counter!(
            "rag_provider_errors_total",
            "provider" => provider.to_string(),
            "kind" => kind
        )
        .increment(1);
    }
}
