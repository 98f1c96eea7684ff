//! Embedding capability
//!
//! The clusterer only needs "text in, vector out". Concrete providers:
//! - `RemoteEmbedder`: OpenAI-compatible `/embeddings` endpoint
//! - `HashingEmbedder`: character n-gram feature hashing, offline and deterministic
//!
//! Nothing is built by default: without a configured model the clusterer
//! groups by exact (error type, category).
//!
//! Providers may fail or hang; the clusterer wraps every call in a timeout and
//! switches to exact-match clustering instead of surfacing the error.

pub mod hash;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::EngineResult;

pub use hash::HashingEmbedder;
pub use remote::RemoteEmbedder;

/// Text-to-vector capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Embed several texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Vector length this provider produces
    fn dimension(&self) -> usize;

    /// Identifier used in logs
    fn model_id(&self) -> String;
}

/// Which provider to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP API
    Remote,
    /// Local feature hashing (no network). Splits inflections of one
    /// mistake apart, so only useful for experiments
    Hash,
    /// No provider; always cluster by exact (error type, category)
    Disabled,
}

impl Default for ProviderKind {
    fn default() -> Self {
        Self::Disabled
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Hash => write!(f, "hash"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Endpoint for the remote provider
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model name (provider-specific)
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Embedding dimension; remote vectors of any other length are rejected
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Texts per API request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Recently embedded texts kept in memory
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// HTTP request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/embeddings".to_string()
}

fn default_model_name() -> String {
    "openai/text-embedding-3-small".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_dimension() -> usize {
    1536
}

fn default_batch_size() -> usize {
    100
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            endpoint: default_endpoint(),
            model_name: default_model_name(),
            api_key_env: default_api_key_env(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            cache_capacity: default_cache_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Build the configured provider; `None` means exact-match clustering only.
///
/// A remote provider that cannot be built (no API key, bad client config)
/// degrades to exact matching, never to hashing.
pub fn build_provider(config: &EmbeddingConfig) -> Option<Arc<dyn EmbeddingProvider>> {
    match config.provider {
        ProviderKind::Disabled => {
            info!("Embeddings disabled, clustering by exact error type and category");
            None
        }
        ProviderKind::Hash => Some(Arc::new(HashingEmbedder::new(config.dimension))),
        ProviderKind::Remote => match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => match RemoteEmbedder::new(config.clone(), key) {
                Ok(embedder) => Some(Arc::new(embedder)),
                Err(e) => {
                    warn!("Failed to build remote embedder: {}. Clustering by exact match", e);
                    None
                }
            },
            _ => {
                warn!("{} not set, clustering by exact match", config.api_key_env);
                None
            }
        },
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Element-wise mean of equally sized vectors
pub fn mean_vector(vectors: &[&[f32]]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut mean = vec![0.0f32; first.len()];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += x;
        }
    }
    let n = vectors.len() as f32;
    for m in mean.iter_mut() {
        *m /= n;
    }
    mean
}

/// Convert embedding vector to little-endian blob
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Convert a blob back into a vector; `None` if the blob is malformed
pub fn blob_to_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return None;
    }
    let embedding: Vec<f32> = blob
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect();
    if embedding.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(embedding)
}
