use std::time::Duration;

use core_config::{ConfigError, FromEnv, env_or_default, env_parse, env_required};
use reqwest::Client;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings shared by the OpenAI-compatible providers
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    /// Total deadline for blocking calls; the idle limit between reads when streaming
    pub timeout: Duration,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Shared client without a total deadline, so long streams are bounded
    /// only by the idle read timeout. Blocking calls set `timeout` per request.
    pub(crate) fn client(&self) -> Client {
        Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(self.timeout)
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}

impl FromEnv for OpenAIConfig {
    /// - OPENAI_API_KEY: required
    /// - OPENAI_BASE_URL: defaults to the public API
    /// - OPENAI_TIMEOUT_SECS: defaults to 60
    fn from_env() -> Result<Self, ConfigError> {
        let api_key = env_required("OPENAI_API_KEY")?;
        let base_url = env_or_default("OPENAI_BASE_URL", DEFAULT_BASE_URL);
        let timeout = env_parse("OPENAI_TIMEOUT_SECS", 60u64)?;

        Ok(Self::new(api_key)
            .with_base_url(base_url)
            .with_timeout(Duration::from_secs(timeout)))
    }
}
