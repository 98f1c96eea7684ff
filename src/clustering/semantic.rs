//! Semantic clustering: embeddings + average-linkage merging within each error type

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::agglomerative::{average_linkage, cohesion, Deadline};
use super::{assign_keys, dominant_category, partition_by_type, ClusteringMode, ClusteringStrategy, ErrorCluster};
use crate::config::ClusteringConfig;
use crate::embeddings::{cosine_similarity, mean_vector, EmbeddingProvider};
use crate::error::{EngineError, EngineResult};
use crate::types::{ErrorEvent, ErrorType};

pub struct SemanticClusterer {
    provider: Arc<dyn EmbeddingProvider>,
    config: ClusteringConfig,
}

impl SemanticClusterer {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: ClusteringConfig) -> Self {
        Self { provider, config }
    }

    /// One vector per event, reusing stored embeddings of the right dimension
    async fn embed_events(&self, events: &[ErrorEvent]) -> EngineResult<Vec<Vec<f32>>> {
        let dimension = self.provider.dimension();
        let mut vectors: Vec<Option<Vec<f32>>> = events
            .iter()
            .map(|e| e.embedding.clone().filter(|v| v.len() == dimension))
            .collect();

        let missing: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| i)
            .collect();

        if !missing.is_empty() {
            let concurrency = self.config.embedding_concurrency.max(1);
            let chunk_size = missing.len().div_ceil(concurrency).max(1);
            let chunks: Vec<Vec<usize>> = missing.chunks(chunk_size).map(|c| c.to_vec()).collect();

            debug!(
                "Embedding {} of {} error contexts with {} in {} batches",
                missing.len(),
                events.len(),
                self.provider.model_id(),
                chunks.len()
            );

            let provider = &self.provider;
            let batches: Vec<(Vec<usize>, Vec<Vec<f32>>)> = stream::iter(chunks)
                .map(|chunk| async move {
                    let texts: Vec<String> = chunk.iter().map(|&i| events[i].embedding_text()).collect();
                    let embedded = provider.embed_batch(&texts).await?;
                    if embedded.len() != chunk.len() {
                        return Err(EngineError::Embedding(format!(
                            "provider returned {} vectors for {} texts",
                            embedded.len(),
                            chunk.len()
                        )));
                    }
                    Ok::<_, EngineError>((chunk, embedded))
                })
                .buffered(concurrency)
                .try_collect()
                .await?;

            for (chunk, embedded) in batches {
                for (i, vector) in chunk.into_iter().zip(embedded) {
                    vectors[i] = Some(vector);
                }
            }
        }

        let vectors: Vec<Vec<f32>> = vectors.into_iter().flatten().collect();
        if vectors.len() != events.len() {
            return Err(EngineError::Embedding("missing embeddings after batch".to_string()));
        }
        let expected = vectors.first().map_or(0, |v| v.len());
        if expected == 0 || vectors.iter().any(|v| v.len() != expected) {
            return Err(EngineError::Embedding("provider returned inconsistent dimensions".to_string()));
        }
        Ok(vectors)
    }
}

/// One error type's events with their vectors, index-aligned
struct Partition {
    error_type: ErrorType,
    events: Vec<ErrorEvent>,
    vectors: Vec<Vec<f32>>,
}

fn build_clusters(partition: Partition, config: &ClusteringConfig, deadline: &Deadline) -> EngineResult<Vec<ErrorCluster>> {
    let Partition { error_type, events, vectors } = partition;
    let groups = average_linkage(&vectors, config.similarity_threshold, deadline)?;

    let mut clusters = Vec::new();
    for group in groups.into_iter().filter(|g| g.len() >= config.min_cluster_size) {
        deadline.check()?;
        let member_vectors: Vec<&[f32]> = group.iter().map(|&i| vectors[i].as_slice()).collect();
        let centroid = mean_vector(&member_vectors);

        let mut representative = 0;
        let mut best = f32::MIN;
        for (pos, v) in member_vectors.iter().enumerate() {
            let s = cosine_similarity(v, &centroid);
            if s > best {
                best = s;
                representative = pos;
            }
        }

        let members: Vec<ErrorEvent> = group.iter().map(|&i| events[i].clone()).collect();
        clusters.push(ErrorCluster {
            key: String::new(),
            error_type,
            category: dominant_category(&members),
            cohesion: cohesion(&vectors, &group),
            centroid: Some(centroid),
            representative,
            members,
        });
    }
    Ok(clusters)
}

#[async_trait]
impl ClusteringStrategy for SemanticClusterer {
    /// Embeds on the async runtime, then merges on the blocking pool so the
    /// caller's timeout can fire during the quadratic part.
    async fn cluster(&self, events: &[ErrorEvent]) -> EngineResult<Vec<ErrorCluster>> {
        let deadline = Deadline::after(Duration::from_millis(self.config.embedding_timeout_ms));
        let mut vectors = self.embed_events(events).await?;
        deadline.check()?;

        // Every index belongs to exactly one partition
        let mut partitions = Vec::new();
        for (error_type, indices) in partition_by_type(events) {
            let mut partition = Partition {
                error_type,
                events: Vec::with_capacity(indices.len()),
                vectors: Vec::with_capacity(indices.len()),
            };
            for i in indices {
                partition.events.push(events[i].clone());
                partition.vectors.push(std::mem::take(&mut vectors[i]));
            }
            partitions.push(partition);
        }

        let config = self.config.clone();
        let mut clusters = tokio::task::spawn_blocking(move || {
            let mut clusters = Vec::new();
            for partition in partitions {
                clusters.extend(build_clusters(partition, &config, &deadline)?);
            }
            Ok::<_, EngineError>(clusters)
        })
        .await
        .map_err(|e| EngineError::Other(e.into()))??;

        assign_keys(&mut clusters);
        Ok(clusters)
    }

    fn mode(&self) -> ClusteringMode {
        ClusteringMode::Semantic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Modality;
    use std::collections::HashMap;

    /// Looks texts up in a fixed table
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingProvider for TableEmbedder {
        async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| EngineError::Embedding(format!("unknown text {}", text)))
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_id(&self) -> String {
            "table".to_string()
        }
    }

    fn event(error_type: ErrorType, category: &str, context: &str) -> ErrorEvent {
        ErrorEvent::new("learner", error_type, Some(category), context, None, Modality::Text)
    }

    fn clusterer(entries: &[(&str, [f32; 3])]) -> SemanticClusterer {
        let table = entries.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect();
        SemanticClusterer::new(Arc::new(TableEmbedder { table }), ClusteringConfig::default())
    }

    #[tokio::test]
    async fn test_never_mixes_error_types() {
        // Identical vectors across types must still split by type
        let c = clusterer(&[("same", [1.0, 0.0, 0.0])]);
        let events = vec![
            event(ErrorType::Grammar, "a", "same"),
            event(ErrorType::Pronunciation, "a", "same"),
            event(ErrorType::Grammar, "a", "same"),
            event(ErrorType::Pronunciation, "a", "same"),
        ];
        let clusters = c.cluster(&events).await.unwrap();
        assert_eq!(clusters.len(), 2);
        for cluster in &clusters {
            assert!(cluster.members.iter().all(|m| m.error_type == cluster.error_type));
        }
    }

    #[tokio::test]
    async fn test_splits_dissimilar_contexts_and_labels_by_majority() {
        let c = clusterer(&[
            ("eu merge", [1.0, 0.1, 0.0]),
            ("tu merg", [0.95, 0.15, 0.0]),
            ("el merg", [1.0, 0.05, 0.0]),
            ("o carte frumos", [0.0, 0.1, 1.0]),
            ("un casa mare", [0.0, 0.05, 1.0]),
        ]);
        let events = vec![
            event(ErrorType::Grammar, "verb_conjugation", "eu merge"),
            event(ErrorType::Grammar, "verb_conjugation", "tu merg"),
            event(ErrorType::Grammar, "spelling", "el merg"),
            event(ErrorType::Grammar, "gender_agreement", "o carte frumos"),
            event(ErrorType::Grammar, "gender_agreement", "un casa mare"),
        ];
        let clusters = c.cluster(&events).await.unwrap();
        assert_eq!(clusters.len(), 2);

        let verbs = clusters.iter().find(|c| c.len() == 3).unwrap();
        assert_eq!(verbs.key, "grammar|verb_conjugation");
        assert!(verbs.cohesion >= 0.65);
        assert!(verbs.centroid.is_some());

        let gender = clusters.iter().find(|c| c.len() == 2).unwrap();
        assert_eq!(gender.key, "grammar|gender_agreement");
    }

    #[tokio::test]
    async fn test_singletons_dropped_below_min_size() {
        let c = clusterer(&[("x", [1.0, 0.0, 0.0]), ("y", [0.0, 1.0, 0.0])]);
        let events = vec![
            event(ErrorType::Grammar, "a", "x"),
            event(ErrorType::Grammar, "b", "y"),
        ];
        assert!(c.cluster(&events).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stored_embeddings_skip_provider() {
        // Table is empty, so any provider call fails
        let c = clusterer(&[]);
        let mut a = event(ErrorType::Grammar, "a", "unknown-1");
        let mut b = event(ErrorType::Grammar, "a", "unknown-2");
        a.embedding = Some(vec![1.0, 0.0, 0.0]);
        b.embedding = Some(vec![1.0, 0.01, 0.0]);

        let clusters = c.cluster(&[a, b]).await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_ids_keep_their_own_vectors() {
        let c = clusterer(&[("x", [1.0, 0.0, 0.0]), ("y", [0.0, 1.0, 0.0])]);
        let mut a = event(ErrorType::Grammar, "a", "x");
        let mut b = event(ErrorType::Grammar, "a", "y");
        a.id = "dup".to_string();
        b.id = "dup".to_string();
        let d = event(ErrorType::Grammar, "a", "y");

        let clusters = c.cluster(&[a, b, d]).await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);
        assert!(clusters[0].members.iter().all(|m| m.context == "y"));
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_a_timeout() {
        let table = [("x".to_string(), vec![1.0, 0.0, 0.0])].into_iter().collect();
        let config = ClusteringConfig {
            embedding_timeout_ms: 0,
            ..Default::default()
        };
        let c = SemanticClusterer::new(Arc::new(TableEmbedder { table }), config);
        let events = vec![
            event(ErrorType::Grammar, "a", "x"),
            event(ErrorType::Grammar, "a", "x"),
        ];
        assert!(matches!(c.cluster(&events).await, Err(EngineError::EmbeddingTimeout(_))));
    }

    #[tokio::test]
    async fn test_wrong_dimension_stored_embedding_is_re_embedded() {
        let c = clusterer(&[("ctx", [0.0, 1.0, 0.0])]);
        let mut a = event(ErrorType::Grammar, "a", "ctx");
        a.embedding = Some(vec![1.0, 0.0]);
        let b = event(ErrorType::Grammar, "a", "ctx");

        let clusters = c.cluster(&[a, b]).await.unwrap();
        assert_eq!(clusters.len(), 1);
    }
}
