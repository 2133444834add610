use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

use crate::chat::{ChatService, ChatStream};
use crate::config::RagConfig;
use crate::completion::CompletionProvider;
use crate::context::to_context_sources;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};
use crate::ingestion::IngestionService;
use crate::models::{
    ChatInput, ChatMessage, ChatUsage, CollectionInfo, ContextSource, DocumentId, IngestInput,
    IngestOutput, Metadata, ProviderHealth, SearchInput, SearchOutput,
};
use crate::parser::{OutputParser, ParsedOutput};
use crate::prompts::build_messages;
use crate::retrieval::RetrievalService;
use crate::store::VectorStore;

/// A question answered against the active collection
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AskRequest {
    pub question: String,
    /// Passages to retrieve, defaults to the configured top_k
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub filter: Option<Metadata>,
    /// Earlier turns, placed between the system prompt and the question
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// Overrides the configured parser
    #[serde(default)]
    pub output_parser: Option<OutputParser>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_top_k(mut self, top_k: i64) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_filter(mut self, filter: Metadata) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_output_parser(mut self, parser: OutputParser) -> Self {
        self.output_parser = Some(parser);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AskResponse {
    pub answer: String,
    /// Structured output, absent for the plain parser
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedOutput>,
    pub sources: Vec<ContextSource>,
    pub usage: ChatUsage,
}

/// Prompt and sources for one question, ready for the completion provider
struct PreparedAsk {
    input: ChatInput,
    sources: Vec<ContextSource>,
    parser: OutputParser,
}

/// Entry point for the HTTP layer: ingestion, search and grounded chat over
/// one store and one pair of providers.
pub struct RagService {
    config: RagConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    completion: Arc<dyn CompletionProvider>,
    ingestion: IngestionService,
    retrieval: RetrievalService,
    chat: ChatService,
}

impl RagService {
    pub fn new(
        config: RagConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Self {
        let ingestion = IngestionService::new(Arc::clone(&store), Arc::clone(&embedder));
        let retrieval = RetrievalService::new(Arc::clone(&store), Arc::clone(&embedder));
        let chat = ChatService::new(Arc::clone(&completion)).with_buffer(config.stream_buffer);
        Self {
            config,
            store,
            embedder,
            completion,
            ingestion,
            retrieval,
            chat,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub async fn ingest(&self, input: IngestInput) -> RagResult<IngestOutput> {
        self.ingestion.ingest(input).await
    }

    /// Ingest with the configured chunking parameters
    pub async fn ingest_text(
        &self,
        document_id: impl Into<DocumentId>,
        text: impl Into<String>,
        base_metadata: Metadata,
    ) -> RagResult<IngestOutput> {
        self.ingest(IngestInput {
            document_id: document_id.into(),
            text: text.into(),
            base_metadata,
            chunk_size: self.config.chunk_size,
            overlap: self.config.chunk_overlap,
        })
        .await
    }

    pub async fn search(&self, input: SearchInput) -> RagResult<SearchOutput> {
        self.retrieval.search(input).await
    }

    pub async fn delete(&self, document_id: &DocumentId) -> RagResult<bool> {
        self.ingestion.delete(document_id).await
    }

    pub async fn collections(&self) -> RagResult<Vec<CollectionInfo>> {
        self.store.list_collections().await
    }

    /// Embedding provider first, then the completion provider
    pub async fn health(&self) -> Vec<ProviderHealth> {
        let (embedding, completion) = tokio::join!(self.embedder.health(), self.completion.health());
        vec![embedding, completion]
    }

    async fn prepare(&self, request: AskRequest) -> RagResult<PreparedAsk> {
        if request.question.trim().is_empty() {
            return Err(RagError::InvalidQuery("question must not be empty".to_string()));
        }

        let top_k = request.top_k.unwrap_or(self.config.top_k);
        let mut search = SearchInput::new(request.question.clone(), top_k);
        search.filter = request.filter;
        let output = self.retrieval.search(search).await?;
        let sources = to_context_sources(&output);

        let parser = request
            .output_parser
            .unwrap_or_else(|| self.config.output_parser.clone());
        let messages = build_messages(
            &self.config.system_prompt,
            &parser,
            &request.history,
            &sources,
            &request.question,
        );

        let mut input = ChatInput::new(messages);
        input.temperature = request.temperature;
        input.max_tokens = request.max_tokens;

        debug!(sources = sources.len(), parser = %parser, "Prepared grounded prompt");
        Ok(PreparedAsk {
            input,
            sources,
            parser,
        })
    }

    /// Retrieve, prompt, complete and parse in one blocking call
    #[instrument(skip(self, request), fields(top_k = request.top_k, history = request.history.len()))]
    pub async fn ask(&self, request: AskRequest) -> RagResult<AskResponse> {
        let PreparedAsk {
            input,
            sources,
            parser,
        } = self.prepare(request).await?;

        let output = self.chat.handle(input).await?;
        let parsed = parser.parse(&output.text)?;

        info!(
            sources = sources.len(),
            total_tokens = output.usage.total_tokens,
            "Answered question"
        );

        let (answer, parsed) = match parser {
            OutputParser::Plain => (parsed.answer, None),
            _ => (parsed.answer.clone(), Some(parsed)),
        };
        Ok(AskResponse {
            answer,
            parsed,
            sources,
            usage: output.usage,
        })
    }

    /// Retrieve and prompt, then stream the raw completion.
    ///
    /// Retrieval errors are returned before any output is produced. Parsers are
    /// not applied to streamed text.
    #[instrument(skip(self, request), fields(top_k = request.top_k))]
    pub async fn ask_stream(
        &self,
        request: AskRequest,
    ) -> RagResult<(Vec<ContextSource>, ChatStream)> {
        let PreparedAsk { input, sources, .. } = self.prepare(request).await?;
        Ok((sources, self.chat.handle_stream(input)))
    }
}
