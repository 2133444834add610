use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::error::{RagError, RagResult};
use crate::models::ProviderHealth;
use crate::store::l2_normalize;

pub const HASHING_MODEL: &str = "fnv1a-bow";

const PROVIDER_NAME: &str = "hashing";
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic bag-of-words embeddings computed in process.
///
/// Lowercased alphanumeric tokens are hashed into `dimension` buckets with a
/// sign bit, then L2-normalized. Texts sharing words get positive cosine
/// similarity. Useful offline and as a test double.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimension: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn provider_name(&self) -> String {
        PROVIDER_NAME.to_string()
    }

    fn model(&self) -> String {
        HASHING_MODEL.to_string()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String], model: &str) -> RagResult<Vec<Vec<f32>>> {
        if model != HASHING_MODEL {
            return Err(RagError::InvalidModel(format!(
                "{PROVIDER_NAME} provider does not serve model '{model}'"
            )));
        }
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    async fn health(&self) -> ProviderHealth {
        if self.dimension == 0 {
            return ProviderHealth::unhealthy(
                PROVIDER_NAME,
                HASHING_MODEL,
                "in-process",
                "dimension must be greater than 0",
            );
        }
        ProviderHealth::healthy(PROVIDER_NAME, HASHING_MODEL, "in-process")
    }
}
