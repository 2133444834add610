//! HTTP handlers for the RAG domain, including SSE chat streaming

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post},
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{OpenApi, ToSchema};

use crate::error::RagResult;
use crate::models::{
    ChatEvent, ChatMessage, ChatRole, ChatUsage, Chunk, CollectionInfo, CollectionSpec, ContextSource,
    DocumentId, HealthStatus, IngestInput, IngestOutput, Metadata, ProviderHealth, SearchInput,
    SearchMatch, SearchOutput,
};
use crate::parser::{OutputParser, ParsedOutput};
use crate::service::{AskRequest, AskResponse, RagService};

/// Document to ingest; chunking falls back to the service configuration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestRequest {
    pub document_id: DocumentId,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub overlap: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub filter: Option<Metadata>,
}

/// Body of every error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

/// OpenAPI documentation for the RAG API
#[derive(OpenApi)]
#[openapi(
    paths(
        ingest_document,
        delete_document,
        search,
        chat,
        chat_stream,
        provider_health,
        list_collections,
    ),
    components(
        schemas(
            IngestRequest, IngestOutput,
            SearchRequest, SearchOutput, SearchMatch, Chunk,
            AskRequest, AskResponse, ParsedOutput, OutputParser,
            ChatMessage, ChatRole, ChatUsage, ContextSource,
            ProviderHealth, HealthStatus,
            CollectionInfo, CollectionSpec, DocumentId,
            ErrorResponse
        )
    ),
    tags(
        (name = "rag-documents", description = "Document ingestion"),
        (name = "rag-search", description = "Similarity search"),
        (name = "rag-chat", description = "Grounded chat, blocking and streamed"),
        (name = "rag-admin", description = "Provider health and collections")
    )
)]
pub struct RagApiDoc;

/// Create the RAG router with all HTTP endpoints
pub fn router(service: Arc<RagService>) -> Router {
    Router::new()
        .route("/documents", post(ingest_document))
        .route("/documents/{id}", delete(delete_document))
        .route("/search", post(search))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/health/providers", get(provider_health))
        .route("/collections", get(list_collections))
        .with_state(service)
}

/// Chunk, embed and store a document, replacing any previous version
#[utoipa::path(
    post,
    path = "/documents",
    tag = "rag-documents",
    request_body = IngestRequest,
    responses(
        (status = 201, description = "Document ingested", body = IngestOutput),
        (status = 400, description = "Invalid document or chunking parameters", body = ErrorResponse),
        (status = 502, description = "Embedding provider error", body = ErrorResponse),
        (status = 503, description = "Embedding provider unavailable", body = ErrorResponse)
    )
)]
async fn ingest_document(
    State(service): State<Arc<RagService>>,
    Json(request): Json<IngestRequest>,
) -> RagResult<impl IntoResponse> {
    let config = service.config();
    let input = IngestInput {
        document_id: request.document_id,
        text: request.text,
        base_metadata: request.metadata,
        chunk_size: request.chunk_size.unwrap_or(config.chunk_size),
        overlap: request.overlap.unwrap_or(config.chunk_overlap),
    };
    let output = service.ingest(input).await?;
    Ok((StatusCode::CREATED, Json(output)))
}

/// Remove a document; removing an unknown document is not an error
#[utoipa::path(
    delete,
    path = "/documents/{id}",
    tag = "rag-documents",
    params(
        ("id" = String, Path, description = "Document id")
    ),
    responses(
        (status = 204, description = "Document removed or absent")
    )
)]
async fn delete_document(
    State(service): State<Arc<RagService>>,
    Path(id): Path<String>,
) -> RagResult<StatusCode> {
    service.delete(&DocumentId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/search",
    tag = "rag-search",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Ranked matches", body = SearchOutput),
        (status = 400, description = "Invalid query", body = ErrorResponse),
        (status = 404, description = "Nothing has been ingested yet", body = ErrorResponse)
    )
)]
async fn search(
    State(service): State<Arc<RagService>>,
    Json(request): Json<SearchRequest>,
) -> RagResult<Json<SearchOutput>> {
    let top_k = request.top_k.unwrap_or(service.config().top_k);
    let input = SearchInput {
        query_text: request.query,
        top_k,
        filter: request.filter,
    };
    Ok(Json(service.search(input).await?))
}

/// Answer a question from retrieved context
#[utoipa::path(
    post,
    path = "/chat",
    tag = "rag-chat",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Answer with its sources", body = AskResponse),
        (status = 400, description = "Invalid question", body = ErrorResponse),
        (status = 422, description = "Model output did not match the parser", body = ErrorResponse),
        (status = 502, description = "Completion provider error", body = ErrorResponse)
    )
)]
async fn chat(
    State(service): State<Arc<RagService>>,
    Json(request): Json<AskRequest>,
) -> RagResult<Json<AskResponse>> {
    Ok(Json(service.ask(request).await?))
}

/// Stream an answer via SSE.
///
/// Emits one `sources` event, then `delta` events, then a single `usage`
/// event. A failure after streaming started ends the stream with an `error`
/// event.
#[utoipa::path(
    post,
    path = "/chat/stream",
    tag = "rag-chat",
    request_body = AskRequest,
    responses(
        (status = 200, description = "SSE stream of sources, deltas and usage"),
        (status = 400, description = "Invalid question", body = ErrorResponse),
        (status = 404, description = "Nothing has been ingested yet", body = ErrorResponse)
    )
)]
async fn chat_stream(
    State(service): State<Arc<RagService>>,
    Json(request): Json<AskRequest>,
) -> RagResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (sources, mut chat) = service.ask_stream(request).await?;

    let stream = async_stream::stream! {
        yield Ok(json_event("sources", &sources));

        while let Some(event) = chat.next().await {
            match event {
                Ok(ChatEvent::Delta(text)) => {
                    yield Ok(json_event("delta", &json!({ "text": text })));
                }
                Ok(ChatEvent::Usage(usage)) => {
                    yield Ok(json_event("usage", &usage));
                }
                Err(e) => {
                    yield Ok(json_event(
                        "error",
                        &json!({ "error": e.kind(), "message": e.to_string() }),
                    ));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
    Event::default().event(name).data(data)
}

/// Health of the embedding and completion providers
#[utoipa::path(
    get,
    path = "/health/providers",
    tag = "rag-admin",
    responses(
        (status = 200, description = "All providers healthy", body = Vec<ProviderHealth>),
        (status = 503, description = "At least one provider unhealthy", body = Vec<ProviderHealth>)
    )
)]
async fn provider_health(State(service): State<Arc<RagService>>) -> impl IntoResponse {
    let report = service.health().await;
    let status = if report.iter().all(ProviderHealth::is_healthy) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

#[utoipa::path(
    get,
    path = "/collections",
    tag = "rag-admin",
    responses(
        (status = 200, description = "Collections hosted by the store", body = Vec<CollectionInfo>)
    )
)]
async fn list_collections(
    State(service): State<Arc<RagService>>,
) -> RagResult<Json<Vec<CollectionInfo>>> {
    Ok(Json(service.collections().await?))
}
