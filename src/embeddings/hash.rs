//! Hash-based embeddings (deterministic, no model needed)
//!
//! Each word is padded and split into character trigrams; every trigram is
//! hashed to a signed bucket. Near-spellings ("merg" / "merge") share most
//! trigrams, so they land close together.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::EmbeddingProvider;
use crate::error::EngineResult;

const NGRAM: usize = 3;

pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        for word in text.to_lowercase().split_whitespace() {
            let padded: Vec<char> = std::iter::once('<')
                .chain(word.chars())
                .chain(std::iter::once('>'))
                .collect();

            if padded.len() <= NGRAM {
                self.add_feature(&mut embedding, &padded);
                continue;
            }
            for gram in padded.windows(NGRAM) {
                self.add_feature(&mut embedding, gram);
            }
        }

        let mag: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag > 0.0 {
            for val in embedding.iter_mut() {
                *val /= mag;
            }
        }

        embedding
    }

    fn add_feature(&self, embedding: &mut [f32], gram: &[char]) {
        let mut hasher = DefaultHasher::new();
        gram.hash(&mut hasher);
        let hash = hasher.finish();

        let bucket = (hash % self.dimension as u64) as usize;
        // Top bit picks the sign so collisions tend to cancel
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        embedding[bucket] += sign;
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        format!("hash-trigram-{}", self.dimension)
    }
}
