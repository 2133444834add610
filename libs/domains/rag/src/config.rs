use core_config::{ConfigError, FromEnv, env_optional, env_parse};

use crate::chat::DEFAULT_STREAM_BUFFER;
use crate::chunker::ChunkingParams;
use crate::parser::OutputParser;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_TOP_K: i64 = 5;

/// Pipeline defaults applied when a request leaves them out
#[derive(Debug, Clone, PartialEq)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: i64,
    pub stream_buffer: usize,
    pub output_parser: OutputParser,
    pub system_prompt: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            output_parser: OutputParser::Plain,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl RagConfig {
    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_top_k(mut self, top_k: i64) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_output_parser(mut self, parser: OutputParser) -> Self {
        self.output_parser = parser;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if ChunkingParams::new(self.chunk_size, self.chunk_overlap).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "RAG_CHUNK_OVERLAP".to_string(),
                details: format!(
                    "overlap {} must be smaller than chunk size {}",
                    self.chunk_overlap, self.chunk_size
                ),
            });
        }
        if self.top_k <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "RAG_TOP_K".to_string(),
                details: format!("must be greater than 0, got {}", self.top_k),
            });
        }
        if self.stream_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RAG_STREAM_BUFFER".to_string(),
                details: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl FromEnv for RagConfig {
    /// - RAG_CHUNK_SIZE / RAG_CHUNK_OVERLAP: 800 / 100 chars
    /// - RAG_TOP_K: 5
    /// - RAG_STREAM_BUFFER: 1
    /// - RAG_OUTPUT_PARSER: plain | final_answer | citations | json
    /// - RAG_SYSTEM_PROMPT: optional override
    fn from_env() -> Result<Self, ConfigError> {
        let output_parser = match env_optional("RAG_OUTPUT_PARSER") {
            Some(value) => value
                .parse::<OutputParser>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "RAG_OUTPUT_PARSER".to_string(),
                    details: e.to_string(),
                })?,
            None => OutputParser::Plain,
        };

        let config = Self {
            chunk_size: env_parse("RAG_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            chunk_overlap: env_parse("RAG_CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
            top_k: env_parse("RAG_TOP_K", DEFAULT_TOP_K)?,
            stream_buffer: env_parse("RAG_STREAM_BUFFER", DEFAULT_STREAM_BUFFER)?,
            output_parser,
            system_prompt: env_optional("RAG_SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };
        config.validate()?;
        Ok(config)
    }
}
