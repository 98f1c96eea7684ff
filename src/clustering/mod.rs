//! Error Pattern Clusterer
//!
//! Groups a learner's error events into patterns. Two strategies share one
//! contract:
//! - `SemanticClusterer`: embeddings + average-linkage agglomerative clustering
//! - `ExactMatchClusterer`: one cluster per (error type, category)
//!
//! `ErrorClusterer` runs the semantic strategy under a timeout and falls back
//! to exact matching on any failure, so callers always get a cluster set.

pub mod agglomerative;
pub mod exact;
pub mod semantic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClusteringConfig;
use crate::embeddings::EmbeddingProvider;
use crate::error::{EngineError, EngineResult};
use crate::types::{pattern_key, ErrorEvent, ErrorType, GENERAL_CATEGORY};

pub use exact::ExactMatchClusterer;
pub use semantic::SemanticClusterer;

/// Which strategy produced a cluster set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringMode {
    Semantic,
    ExactMatch,
}

impl std::fmt::Display for ClusteringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusteringMode::Semantic => write!(f, "semantic"),
            ClusteringMode::ExactMatch => write!(f, "exact_match"),
        }
    }
}

/// A group of same-type events with similar contexts.
///
/// Derived on demand; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCluster {
    /// "error_type|category", with a "#n" suffix when a type has several
    /// clusters sharing the same dominant category
    pub key: String,
    pub error_type: ErrorType,
    /// Most frequent category among members
    pub category: String,
    pub members: Vec<ErrorEvent>,
    /// Mean member embedding; `None` for exact-match clusters
    pub centroid: Option<Vec<f32>>,
    /// Mean pairwise cosine similarity, 0-1
    pub cohesion: f32,
    /// Index into `members` of the member closest to the centroid
    pub representative: usize,
}

impl ErrorCluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn representative_event(&self) -> Option<&ErrorEvent> {
        self.members.get(self.representative)
    }
}

/// Output of a clustering pass
#[derive(Debug, Clone)]
pub struct ClusterSet {
    pub clusters: Vec<ErrorCluster>,
    pub mode: ClusteringMode,
}

/// A way of turning events into clusters
#[async_trait]
pub trait ClusteringStrategy: Send + Sync {
    async fn cluster(&self, events: &[ErrorEvent]) -> EngineResult<Vec<ErrorCluster>>;

    fn mode(&self) -> ClusteringMode;
}

/// Clusterer with semantic primary and exact-match fallback
pub struct ErrorClusterer {
    primary: Option<Arc<dyn ClusteringStrategy>>,
    fallback: ExactMatchClusterer,
    timeout: Duration,
}

impl ErrorClusterer {
    /// Semantic clustering when a provider is available, exact matching otherwise
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>, config: ClusteringConfig) -> Self {
        let primary = provider.map(|p| {
            Arc::new(SemanticClusterer::new(p, config.clone())) as Arc<dyn ClusteringStrategy>
        });
        Self::with_strategy(primary, config)
    }

    /// Use an arbitrary primary strategy
    pub fn with_strategy(primary: Option<Arc<dyn ClusteringStrategy>>, config: ClusteringConfig) -> Self {
        Self {
            primary,
            timeout: Duration::from_millis(config.embedding_timeout_ms),
            fallback: ExactMatchClusterer::new(config.min_cluster_size),
        }
    }

    /// Cluster events; never fails
    pub async fn cluster(&self, events: &[ErrorEvent]) -> ClusterSet {
        if events.is_empty() {
            return ClusterSet {
                clusters: Vec::new(),
                mode: self.primary.as_ref().map_or(ClusteringMode::ExactMatch, |p| p.mode()),
            };
        }

        if let Some(primary) = &self.primary {
            let outcome = match tokio::time::timeout(self.timeout, primary.cluster(events)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::EmbeddingTimeout(self.timeout)),
            };

            match outcome {
                Ok(clusters) => {
                    debug!("{} clustering produced {} clusters from {} events", primary.mode(), clusters.len(), events.len());
                    return ClusterSet { clusters, mode: primary.mode() };
                }
                Err(e) => {
                    warn!("{} clustering failed: {}. Falling back to exact-match clustering", primary.mode(), e);
                }
            }
        }

        ClusterSet {
            clusters: self.fallback.cluster_sync(events),
            mode: ClusteringMode::ExactMatch,
        }
    }
}

/// Partition event indices by error type, keeping first-seen order of types
pub(crate) fn partition_by_type(events: &[ErrorEvent]) -> Vec<(ErrorType, Vec<usize>)> {
    let mut order: Vec<ErrorType> = Vec::new();
    let mut groups: HashMap<ErrorType, Vec<usize>> = HashMap::new();
    for (i, event) in events.iter().enumerate() {
        groups.entry(event.error_type)
            .or_insert_with(|| {
                order.push(event.error_type);
                Vec::new()
            })
            .push(i);
    }
    order.into_iter()
        .filter_map(|t| groups.remove(&t).map(|g| (t, g)))
        .collect()
}

/// Most frequent category among events; ties go to the first seen
pub(crate) fn dominant_category<'a>(events: impl IntoIterator<Item = &'a ErrorEvent>) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for event in events {
        let label = event.category_label();
        match counts.iter_mut().find(|(c, _)| *c == label) {
            Some((_, n)) => *n += 1,
            None => counts.push((label, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (label, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((label, n));
        }
    }
    best.map_or_else(|| GENERAL_CATEGORY.to_string(), |(label, _)| label.to_string())
}

/// Give every cluster its pattern key.
///
/// Clusters sharing (type, category) are ranked by size, largest first; the
/// largest keeps the plain key and the rest get "#2", "#3", ... so keys stay
/// stable for the ledger as long as the main pattern stays the largest.
pub(crate) fn assign_keys(clusters: &mut [ErrorCluster]) {
    let mut order: Vec<usize> = (0..clusters.len()).collect();
    order.sort_by(|&a, &b| clusters[b].len().cmp(&clusters[a].len()).then(a.cmp(&b)));

    let mut seen: HashMap<String, usize> = HashMap::new();
    for idx in order {
        let base = pattern_key(clusters[idx].error_type, &clusters[idx].category);
        let n = seen.entry(base.clone()).or_insert(0);
        *n += 1;
        clusters[idx].key = if *n == 1 { base } else { format!("{}#{}", base, n) };
    }
}
