use async_trait::async_trait;
use core_config::{FromEnv, env_optional};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sse::SseDecoder;
use super::{CompletionProvider, DeltaSink};
use crate::error::{RagError, RagResult};
use crate::models::{ChatInput, ChatMessage, ChatOutput, ChatUsage, ProviderHealth};
use crate::openai::OpenAIConfig;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

const PROVIDER_NAME: &str = "openai";
const DONE_MARKER: &str = "[DONE]";

/// OpenAI-compatible `/chat/completions` client
pub struct OpenAIChatProvider {
    client: Client,
    config: OpenAIConfig,
    model: String,
}

impl OpenAIChatProvider {
    pub fn new(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: config.client(),
            config,
            model: model.into(),
        }
    }

    /// Reads `OPENAI_*` plus `CHAT_MODEL`
    pub fn from_env() -> RagResult<Self> {
        let config = OpenAIConfig::from_env().map_err(|e| RagError::Config(e.to_string()))?;
        let model = env_optional("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.into());
        Ok(Self::new(config, model))
    }

    fn request<'a>(&'a self, input: &'a ChatInput, stream: bool) -> CompletionRequest<'a> {
        CompletionRequest {
            model: input.model.as_deref().unwrap_or(&self.model),
            messages: &input.messages,
            temperature: input.temperature,
            max_tokens: input.max_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn send(&self, request: &CompletionRequest<'_>) -> RagResult<Response> {
        debug!(
            model = request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "Requesting chat completion"
        );
        let mut builder = self
            .client
            .post(self.config.endpoint("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(request);
        // Streams are bounded by the client's idle read timeout instead
        if !request.stream {
            builder = builder.timeout(self.config.timeout);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, model = request.model, "Chat completion request failed");
            return Err(RagError::ProviderHttpError { status, body });
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl From<WireUsage> for ChatUsage {
    fn from(usage: WireUsage) -> Self {
        ChatUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage
                .total_tokens
                .unwrap_or(usage.prompt_tokens.saturating_add(usage.completion_tokens)),
        }
    }
}

/// Applies one SSE payload; returns true on the terminator.
///
/// Usage is kept as the latest report rather than summed: OpenAI sends it
/// once in the final chunk, some compatible servers repeat a running total.
async fn handle_payload(
    payload: &str,
    sink: &mut DeltaSink,
    usage: &mut Option<ChatUsage>,
) -> RagResult<bool> {
    let payload = payload.trim();
    if payload == DONE_MARKER {
        return Ok(true);
    }
    if payload.is_empty() {
        return Ok(false);
    }

    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|e| RagError::invalid_response(format!("malformed stream chunk: {e}")))?;
    if let Some(reported) = chunk.usage {
        *usage = Some(reported.into());
    }
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            sink.send_delta(content).await?;
        }
    }
    Ok(false)
}

#[async_trait]
impl CompletionProvider for OpenAIChatProvider {
    fn name(&self) -> String {
        PROVIDER_NAME.to_string()
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn endpoint(&self) -> String {
        self.config.endpoint("chat/completions")
    }

    async fn complete(&self, input: ChatInput) -> RagResult<ChatOutput> {
        let response = self.send(&self.request(&input, false)).await?;
        let body: CompletionResponse = response.json().await.map_err(|e| {
            RagError::invalid_response(format!("malformed completion response: {e}"))
        })?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RagError::invalid_response("completion response has no choices"))?;

        Ok(ChatOutput {
            text: choice.message.content.unwrap_or_default(),
            usage: body.usage.map(ChatUsage::from).unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }

    async fn stream(&self, input: ChatInput, sink: &mut DeltaSink) -> RagResult<()> {
        let response = self.send(&self.request(&input, true)).await?;
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut usage = None;

        while let Some(chunk) = body.next().await {
            let bytes = chunk.map_err(|e| {
                RagError::ProviderUnavailable(format!("stream interrupted: {e}"))
            })?;
            for payload in decoder.push(&bytes) {
                if handle_payload(&payload, sink, &mut usage).await? {
                    sink.add_usage(usage.unwrap_or_default());
                    return Ok(());
                }
            }
        }

        if let Some(payload) = decoder.finish()
            && handle_payload(&payload, sink, &mut usage).await?
        {
            sink.add_usage(usage.unwrap_or_default());
            return Ok(());
        }
        Err(RagError::invalid_response("stream ended without [DONE] terminator"))
    }

    async fn health(&self) -> ProviderHealth {
        let endpoint = self.config.endpoint(&format!("models/{}", self.model));
        match self
            .client
            .get(&endpoint)
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                ProviderHealth::healthy(PROVIDER_NAME, &self.model, self.endpoint())
            }
            Ok(response) => ProviderHealth::unhealthy(
                PROVIDER_NAME,
                &self.model,
                self.endpoint(),
                format!("model lookup returned {}", response.status()),
            ),
            Err(e) => {
                ProviderHealth::unhealthy(PROVIDER_NAME, &self.model, self.endpoint(), e.to_string())
            }
        }
    }
}
