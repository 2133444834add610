use async_trait::async_trait;
use core_config::{FromEnv, env_optional, env_parse};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::EmbeddingProvider;
use crate::error::{RagError, RagResult};
use crate::models::ProviderHealth;
use crate::openai::OpenAIConfig;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

const PROVIDER_NAME: &str = "openai";

/// OpenAI-compatible `/embeddings` client
pub struct OpenAIEmbeddingProvider {
    client: Client,
    config: OpenAIConfig,
    model: String,
    dimension: usize,
}

impl OpenAIEmbeddingProvider {
    pub fn new(config: OpenAIConfig, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: config.client(),
            config,
            model: model.into(),
            dimension,
        }
    }

    /// Reads `OPENAI_*` plus `EMBEDDING_MODEL` and `EMBEDDING_DIMENSION`
    pub fn from_env() -> RagResult<Self> {
        let config = OpenAIConfig::from_env().map_err(|e| RagError::Config(e.to_string()))?;
        let model =
            env_optional("EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.into());
        let dimension = env_parse("EMBEDDING_DIMENSION", DEFAULT_EMBEDDING_DIMENSION)
            .map_err(|e| RagError::Config(e.to_string()))?;
        Ok(Self::new(config, model, dimension))
    }

    /// Only the v3 models accept a `dimensions` override
    fn requested_dimensions(&self, model: &str) -> Option<usize> {
        model.starts_with("text-embedding-3").then_some(self.dimension)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// 4xx responses about the request itself mean the model is unusable
fn map_error_status(status: StatusCode, model: &str, body: String) -> RagError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            RagError::InvalidModel(format!("{model}: {body}"))
        }
        _ => RagError::ProviderUnavailable(format!("OpenAI API error ({status}): {body}")),
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn provider_name(&self) -> String {
        PROVIDER_NAME.to_string()
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String], model: &str) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbeddingRequest {
            model,
            input: texts,
            dimensions: self.requested_dimensions(model),
        };

        debug!(model, inputs = texts.len(), "Requesting embeddings");
        let response = self
            .client
            .post(self.config.endpoint("embeddings"))
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, model, "Embedding request failed");
            return Err(map_error_status(status, model, body));
        }

        let embedding_response: EmbeddingResponse = response.json().await?;

        // Sort by index to maintain input order
        let mut data = embedding_response.data;
        data.sort_by_key(|d| d.index);

        if data.len() != texts.len() {
            return Err(RagError::invalid_response(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    async fn health(&self) -> ProviderHealth {
        let endpoint = self.config.endpoint(&format!("models/{}", self.model));
        let result = self
            .client
            .get(&endpoint)
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                ProviderHealth::healthy(PROVIDER_NAME, &self.model, &self.config.base_url)
            }
            Ok(response) => ProviderHealth::unhealthy(
                PROVIDER_NAME,
                &self.model,
                &self.config.base_url,
                format!("model lookup returned {}", response.status()),
            ),
            Err(e) => ProviderHealth::unhealthy(
                PROVIDER_NAME,
                &self.model,
                &self.config.base_url,
                e.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode as AxumStatus, routing::post};
    use serde_json::{Value, json};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn test_provider(base_url: String) -> OpenAIEmbeddingProvider {
        OpenAIEmbeddingProvider::new(
            OpenAIConfig::new("sk-test").with_base_url(base_url),
            "text-embedding-3-small",
            2,
        )
    }

    #[tokio::test]
    async fn test_embed_reorders_by_index() {
        let router = Router::new().route(
            "/embeddings",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["dimensions"], 2);
                Json(json!({
                    "data": [
                        {"embedding": [0.0, 1.0], "index": 1},
                        {"embedding": [1.0, 0.0], "index": 0}
                    ],
                    "usage": {"prompt_tokens": 2, "total_tokens": 2}
                }))
            }),
        );
        let provider = test_provider(spawn(router).await);

        let vectors = provider
            .embed(&["a".to_string(), "b".to_string()], "text-embedding-3-small")
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_embed_maps_error_statuses() {
        let router = Router::new().route(
            "/embeddings",
            post(|| async { (AxumStatus::NOT_FOUND, "model not found") }),
        );
        let provider = test_provider(spawn(router).await);
        let err = provider.embed(&["a".to_string()], "nope").await.unwrap_err();
        assert!(matches!(err, RagError::InvalidModel(ref msg) if msg.contains("nope")));

        let router = Router::new().route(
            "/embeddings",
            post(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let provider = test_provider(spawn(router).await);
        let err = provider.embed(&["a".to_string()], "m").await.unwrap_err();
        assert!(matches!(err, RagError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_embed_rejects_short_response() {
        let router = Router::new().route(
            "/embeddings",
            post(|| async { Json(json!({"data": [{"embedding": [1.0, 0.0], "index": 0}]})) }),
        );
        let provider = test_provider(spawn(router).await);
        let err = provider
            .embed(&["a".to_string(), "b".to_string()], "text-embedding-3-small")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ProviderInvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let provider = test_provider("http://127.0.0.1:9".to_string());
        let err = provider.embed(&["a".to_string()], "m").await.unwrap_err();
        assert!(matches!(err, RagError::ProviderUnavailable(_)));

        let health = provider.health().await;
        assert!(!health.is_healthy());
        assert_eq!(health.provider, "openai");
    }

    #[test]
    fn test_from_env_defaults() {
        temp_env::with_vars(
            [
                ("OPENAI_API_KEY", Some("sk-test")),
                ("EMBEDDING_MODEL", None),
                ("EMBEDDING_DIMENSION", None),
            ],
            || {
                let provider = OpenAIEmbeddingProvider::from_env().unwrap();
                assert_eq!(provider.model(), DEFAULT_EMBEDDING_MODEL);
                assert_eq!(provider.dimension(), DEFAULT_EMBEDDING_DIMENSION);
            },
        );
    }
}
