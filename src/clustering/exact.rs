//! Exact-match clustering by (error type, category)
//!
//! Always available. Coarser than semantic clustering: two different mistakes
//! sharing a category label land in the same cluster.

use async_trait::async_trait;
use std::collections::HashMap;

use super::{assign_keys, ClusteringMode, ClusteringStrategy, ErrorCluster};
use crate::error::EngineResult;
use crate::types::{ErrorEvent, ErrorType};

pub struct ExactMatchClusterer {
    min_cluster_size: usize,
}

impl ExactMatchClusterer {
    pub fn new(min_cluster_size: usize) -> Self {
        Self { min_cluster_size }
    }

    /// Group events; groups below the minimum size are dropped unless that
    /// would leave nothing, so any non-empty input yields clusters.
    pub fn cluster_sync(&self, events: &[ErrorEvent]) -> Vec<ErrorCluster> {
        let mut order: Vec<(ErrorType, String)> = Vec::new();
        let mut groups: HashMap<(ErrorType, String), Vec<ErrorEvent>> = HashMap::new();

        for event in events {
            let key = (event.error_type, event.category_label().to_string());
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(event.clone());
        }

        let mut clusters: Vec<ErrorCluster> = order
            .into_iter()
            .filter_map(|key| groups.remove(&key).map(|members| (key, members)))
            .map(|((error_type, category), members)| {
                let representative = newest_member(&members);
                ErrorCluster {
                    key: String::new(),
                    error_type,
                    category,
                    members,
                    centroid: None,
                    // Members share an identical label
                    cohesion: 1.0,
                    representative,
                }
            })
            .collect();

        if clusters.iter().any(|c| c.len() >= self.min_cluster_size) {
            clusters.retain(|c| c.len() >= self.min_cluster_size);
        }

        assign_keys(&mut clusters);
        clusters
    }
}

fn newest_member(members: &[ErrorEvent]) -> usize {
    members
        .iter()
        .enumerate()
        .max_by_key(|(_, e)| e.created_at)
        .map_or(0, |(i, _)| i)
}

#[async_trait]
impl ClusteringStrategy for ExactMatchClusterer {
    async fn cluster(&self, events: &[ErrorEvent]) -> EngineResult<Vec<ErrorCluster>> {
        Ok(self.cluster_sync(events))
    }

    fn mode(&self) -> ClusteringMode {
        ClusteringMode::ExactMatch
    }
}
