//! Remote embeddings via an OpenAI-compatible `/embeddings` endpoint
//!
//! Works with OpenRouter and OpenAI directly. Recently embedded texts are
//! kept in an LRU cache, since learners repeat the same mistakes verbatim.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{EmbeddingConfig, EmbeddingProvider};
use crate::error::{EngineError, EngineResult};

pub struct RemoteEmbedder {
    config: EmbeddingConfig,
    api_key: String,
    client: Client,
    cache: Arc<Mutex<lru::LruCache<u64, Vec<f32>>>>,
}

impl RemoteEmbedder {
    pub fn new(config: EmbeddingConfig, api_key: String) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EngineError::Embedding(format!("failed to build HTTP client: {}", e)))?;

        let capacity = NonZeroUsize::new(config.cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            config,
            api_key,
            client,
            cache: Arc::new(Mutex::new(lru::LruCache::new(capacity))),
        })
    }

    /// Send one request for a chunk of texts
    async fn request(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.config.model_name.clone(),
            input: texts.iter().map(|t| self.truncate_text(t).to_string()).collect(),
        };

        let response = self.client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Embedding(format!("failed to send embedding request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!("Embedding API error ({}): {}", status, error_text);
            return Err(EngineError::Embedding(format!("embedding API returned {}: {}", status, error_text)));
        }

        let result: EmbeddingResponse = response.json().await
            .map_err(|e| EngineError::Embedding(format!("failed to parse embedding response: {}", e)))?;

        // Sort by index to maintain order
        let mut data = result.data;
        data.sort_by_key(|d| d.index);

        if data.len() != texts.len() {
            return Err(EngineError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }

        let embeddings: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
        check_dimension(&embeddings, self.config.dimension)?;
        Ok(embeddings)
    }

    /// Truncate text to maximum length (rough estimate: 4 chars per token)
    fn truncate_text<'a>(&self, text: &'a str) -> &'a str {
        const MAX_CHARS: usize = 8191 * 4;
        match text.char_indices().nth(MAX_CHARS) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    fn cache_key(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results.pop()
            .ok_or_else(|| EngineError::Embedding("no embedding in response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();

        {
            let mut cache = self.cache.lock().await;
            for (i, text) in texts.iter().enumerate() {
                match cache.get(&Self::cache_key(text)) {
                    Some(cached) => results[i] = Some(cached.clone()),
                    None => missing.push(i),
                }
            }
        }

        debug!(
            "Embedding {} texts ({} cached) via {}",
            texts.len(),
            texts.len() - missing.len(),
            self.config.model_name
        );

        for chunk in missing.chunks(self.config.batch_size.max(1)) {
            let chunk_texts: Vec<String> = chunk.iter().map(|&i| texts[i].clone()).collect();
            let embeddings = self.request(&chunk_texts).await?;

            let mut cache = self.cache.lock().await;
            for (&i, embedding) in chunk.iter().zip(embeddings) {
                cache.put(Self::cache_key(&texts[i]), embedding.clone());
                results[i] = Some(embedding);
            }
        }

        results.into_iter()
            .map(|r| r.ok_or_else(|| EngineError::Embedding("missing embedding".to_string())))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_id(&self) -> String {
        self.config.model_name.clone()
    }
}

/// Reject vectors whose length differs from the configured dimension
fn check_dimension(embeddings: &[Vec<f32>], expected: usize) -> EngineResult<()> {
    match embeddings.iter().find(|e| e.len() != expected) {
        Some(bad) => Err(EngineError::Embedding(format!(
            "model returned {}-dimensional vectors, configured dimension is {}",
            bad.len(),
            expected
        ))),
        None => Ok(()),
    }
}

/// OpenAI embedding request
#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

/// OpenAI embedding response
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: i32,
}
