//! Observability utilities for the RAG service.
//!
//! This crate provides:
//! - Prometheus metrics recording and export
//! - Retrieval metrics (ingestion, search, chat streams, provider errors)
//! - Axum middleware for automatic request metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, metrics_handler, RagMetrics};
//!
//! init_metrics();
//!
//! RagMetrics::record_ingest("openai:text-embedding-3-small", 12, elapsed);
//!
//! let app = Router::new()
//!     .route("/metrics", get(metrics_handler));
//! ```

pub mod middleware;
pub mod rag;

pub use middleware::metrics_middleware;
pub use rag::{ChatOutcome, RagMetrics};

pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder once per process.
///
/// Later calls return the same handle. If another recorder was installed
/// first, the handle still renders but stays empty.
pub fn init_metrics() -> &'static PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => info!("Prometheus metrics recorder initialized"),
            Err(e) => warn!(error = %e, "A global metrics recorder was already installed"),
        }

        register_metric_descriptions();
        handle
    })
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Axum handler for /metrics endpoint
pub async fn metrics_handler() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

fn register_metric_descriptions() {
    use metrics::{describe_counter, describe_histogram};

    // HTTP metrics
    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "http_requests_errors_total",
        "Total number of HTTP request errors"
    );
    describe_counter!(
        "http_requests_rate_limited_total",
        "Requests rejected by the per-client rate limiter"
    );

    // Retrieval metrics
    describe_counter!(
        "rag_documents_ingested_total",
        "Documents ingested by collection"
    );
    describe_counter!(
        "rag_chunks_ingested_total",
        "Chunks embedded and stored by collection"
    );
    describe_histogram!(
        "rag_ingest_duration_seconds",
        "Document ingestion duration in seconds"
    );
    describe_counter!("rag_searches_total", "Similarity searches by collection");
    describe_histogram!(
        "rag_search_duration_seconds",
        "Similarity search duration in seconds, including query embedding"
    );
    describe_histogram!("rag_search_results", "Matches returned per search");

    // Chat metrics
    describe_counter!(
        "rag_chat_requests_total",
        "Chat completions by mode and outcome"
    );
    describe_counter!(
        "rag_completion_tokens_total",
        "Tokens reported by completion providers"
    );
    describe_counter!(
        "rag_provider_errors_total",
        "Upstream provider failures by provider and error kind"
    );
}
