use std::num::NonZeroU32;

use core_config::{ConfigError, Environment, FromEnv, env_parse, server::ServerConfig};
use domain_rag::RagConfig;

/// Per-client request budget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_minute: NonZeroU32,
    pub burst: NonZeroU32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: NonZeroU32::new(120).unwrap_or(NonZeroU32::MIN),
            burst: NonZeroU32::new(20).unwrap_or(NonZeroU32::MIN),
        }
    }
}

fn non_zero(key: &str, value: u32) -> Result<NonZeroU32, ConfigError> {
    NonZeroU32::new(value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        details: "must be greater than 0".to_string(),
    })
}

impl FromEnv for RateLimitConfig {
    /// - RATE_LIMIT_PER_MINUTE: defaults to 120
    /// - RATE_LIMIT_BURST: defaults to 20
    fn from_env() -> Result<Self, ConfigError> {
        let per_minute = env_parse("RATE_LIMIT_PER_MINUTE", 120u32)?;
        let burst = env_parse("RATE_LIMIT_BURST", 20u32)?;

        Ok(Self {
            per_minute: non_zero("RATE_LIMIT_PER_MINUTE", per_minute)?,
            burst: non_zero("RATE_LIMIT_BURST", burst)?,
        })
    }
}

/// Application configuration, composed from the shared config components
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub rag: RagConfig,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        Ok(Self {
            environment: Environment::from_env(),
            server: ServerConfig::from_env()?, // HOST=0.0.0.0, PORT=8080
            rate_limit: RateLimitConfig::from_env()?,
            rag: RagConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_defaults() {
        temp_env::with_vars_unset(["RATE_LIMIT_PER_MINUTE", "RATE_LIMIT_BURST"], || {
            let config = RateLimitConfig::from_env().unwrap();
            assert_eq!(config, RateLimitConfig::default());
            assert_eq!(config.per_minute.get(), 120);
            assert_eq!(config.burst.get(), 20);
        });
    }

    #[test]
    fn test_rate_limit_rejects_zero() {
        temp_env::with_var("RATE_LIMIT_BURST", Some("0"), || {
            let err = RateLimitConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "RATE_LIMIT_BURST"));
        });
    }

    #[test]
    fn test_config_composes_sections() {
        temp_env::with_vars(
            [
                ("PORT", Some("9090")),
                ("RAG_TOP_K", Some("7")),
                ("RATE_LIMIT_PER_MINUTE", Some("30")),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.server.port, 9090);
                assert_eq!(config.rag.top_k, 7);
                assert_eq!(config.rate_limit.per_minute.get(), 30);
            },
        );
    }
}
