use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Chunk metadata; ordered so filters and serialized payloads are deterministic
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the storage index of a chunk within its document
pub const CHUNK_INDEX_KEY: &str = "chunkIndex";

/// Metadata key holding the owning document id
pub const DOCUMENT_ID_KEY: &str = "documentId";

/// Stable identifier of a source document
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
#[schema(value_type = String)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifies the embedding provider/model that produced a collection's vectors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct CollectionSpec {
    pub provider: String,
    pub model: String,
    pub dim: usize,
}

impl CollectionSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, dim: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            dim,
        }
    }

    /// Collection name, unique per provider/model pair
    pub fn name(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

impl fmt::Display for CollectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (dim={})", self.provider, self.model, self.dim)
    }
}

/// A bounded span of document text stored as one retrieval unit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// AND semantics: every filter pair must match exactly
    pub fn matches(&self, filter: &Metadata) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.metadata.get(key) == Some(value))
    }
}

/// One vector handed to the store for a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub chunk_index: usize,
    pub embedding: Vec<f32>,
    pub chunk: Chunk,
}

impl VectorRecord {
    pub fn new(chunk_index: usize, embedding: Vec<f32>, chunk: Chunk) -> Self {
        Self {
            chunk_index,
            embedding,
            chunk,
        }
    }
}

/// The atomic storage unit, keyed by (collection, document_id, chunk_index)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVector {
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub embedding: Vec<f32>,
    pub chunk: Chunk,
}

/// A ranked retrieval result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchMatch {
    pub document_id: DocumentId,
    /// Storage index of the chunk within its document
    pub chunk_index: usize,
    pub chunk: Chunk,
    /// Cosine similarity, higher is more relevant
    pub score: f32,
}

/// Summary of a collection hosted by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CollectionInfo {
    pub spec: CollectionSpec,
    pub documents: usize,
    pub vectors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestInput {
    pub document_id: DocumentId,
    pub text: String,
    #[serde(default)]
    pub base_metadata: Metadata,
    pub chunk_size: usize,
    pub overlap: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IngestOutput {
    pub document_id: DocumentId,
    pub chunks_ingested: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchInput {
    pub query_text: String,
    /// Must be > 0
    pub top_k: i64,
    #[serde(default)]
    pub filter: Option<Metadata>,
}

impl SearchInput {
    pub fn new(query_text: impl Into<String>, top_k: i64) -> Self {
        Self {
            query_text: query_text.into(),
            top_k,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Metadata) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchOutput {
    pub matches: Vec<SearchMatch>,
}

/// Prompt-facing projection of a search match.
///
/// `chunk_index` is the presentation rank (position in the search result),
/// not the storage index of the chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContextSource {
    pub document_id: DocumentId,
    pub title: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request to a completion provider
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct ChatInput {
    pub messages: Vec<ChatMessage>,
    /// Overrides the provider's configured model
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ChatInput {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token accounting for a completion exchange. Additive across stream increments,
/// saturating at `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ChatUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

impl Add for ChatUsage {
    type Output = ChatUsage;

    fn add(self, rhs: ChatUsage) -> ChatUsage {
        ChatUsage {
            prompt_tokens: self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(rhs.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(rhs.total_tokens),
        }
    }
}

impl AddAssign for ChatUsage {
    fn add_assign(&mut self, rhs: ChatUsage) {
        *self = *self + rhs;
    }
}

impl Sum for ChatUsage {
    fn sum<I: Iterator<Item = ChatUsage>>(iter: I) -> Self {
        iter.fold(ChatUsage::default(), Add::add)
    }
}

/// Response from a completion provider
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct ChatOutput {
    pub text: String,
    pub usage: ChatUsage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Item of a streamed completion as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Non-empty incremental text fragment
    Delta(String),
    /// Cumulative usage, emitted once after the final delta of a completed stream
    Usage(ChatUsage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Read-only diagnostic for health-check aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderHealth {
    pub status: HealthStatus,
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProviderHealth {
    pub fn healthy(
        provider: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            status: HealthStatus::Healthy,
            provider: provider.into(),
            model: model.into(),
            endpoint: endpoint.into(),
            detail: None,
        }
    }

    pub fn unhealthy(
        provider: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            provider: provider.into(),
            model: model.into(),
            endpoint: endpoint.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_is_additive() {
        let total: ChatUsage = [ChatUsage::new(10, 1), ChatUsage::new(0, 2), ChatUsage::new(0, 3)]
            .into_iter()
            .sum();
        assert_eq!(total, ChatUsage::new(10, 6));
        assert_eq!(total.total_tokens, 16);

        let mut acc = ChatUsage::default();
        acc += ChatUsage::new(1, 1);
        assert_eq!(acc.total_tokens, 2);
    }

    #[test]
    fn test_usage_saturates_instead_of_overflowing() {
        let huge = ChatUsage::new(u32::MAX - 1, 5);
        assert_eq!(huge.total_tokens, u32::MAX);

        let total = huge + ChatUsage::new(10, 10);
        assert_eq!(total.prompt_tokens, u32::MAX);
        assert_eq!(total.completion_tokens, 15);
        assert_eq!(total.total_tokens, u32::MAX);
    }

    #[test]
    fn test_chunk_filter_and_semantics() {
        let mut metadata = Metadata::new();
        metadata.insert("lang".into(), "en".into());
        metadata.insert("source".into(), "wiki".into());
        let chunk = Chunk::new("text").with_metadata(metadata);

        let mut filter = Metadata::new();
        filter.insert("lang".into(), "en".into());
        assert!(chunk.matches(&filter));

        filter.insert("source".into(), "blog".into());
        assert!(!chunk.matches(&filter));

        assert!(chunk.matches(&Metadata::new()));
    }

    #[test]
    fn test_document_id_ordering_and_serde() {
        let a = DocumentId::from("alpha");
        let b = DocumentId::from("beta");
        assert!(a < b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"alpha\"");
        assert!(DocumentId::new("  ").is_empty());
    }

    #[test]
    fn test_collection_name() {
        let spec = CollectionSpec::new("openai", "text-embedding-3-small", 1536);
        assert_eq!(spec.name(), "openai:text-embedding-3-small");
        assert_eq!(spec.to_string(), "openai:text-embedding-3-small (dim=1536)");
    }

    #[test]
    fn test_chat_event_serialization() {
        let event = ChatEvent::Delta("Hel".into());
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "delta", "data": "Hel"})
        );
    }
}
