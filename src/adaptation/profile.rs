//! Adaptation profile: the per-request projection of clusters and ledger history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::tier::{classify, PatternHistory};
use super::trend::{compute_trend, frequency};
use super::weights::{synthesize, ContentWeights};
use crate::clustering::{ClusteringMode, ErrorCluster};
use crate::config::TierConfig;
use crate::ledger::InterventionRecord;
use crate::types::{ErrorType, ExamplePair, PrimaryModality, Tier, Trend};

/// Recent examples kept per pattern
pub const MAX_EXAMPLES: usize = 5;

/// One surfaced pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationPriority {
    pub pattern_key: String,
    pub error_type: ErrorType,
    pub category: String,
    /// Share of all the learner's errors, 0-100
    pub frequency: u8,
    pub tier: Tier,
    pub trend: Trend,
    pub intervention_count: usize,
    pub intervention_successes: usize,
    pub last_intervention_at: Option<DateTime<Utc>>,
    /// Newest first
    pub examples: Vec<ExamplePair>,
    pub primary_modality: PrimaryModality,
    pub last_occurred: DateTime<Utc>,
    pub cohesion: f32,
    pub member_count: usize,
}

/// Everything a content or challenge selector needs for one learner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationProfile {
    pub learner_id: String,
    /// Sorted by tier, then frequency, both descending
    pub priorities: Vec<AdaptationPriority>,
    pub highest_tier: Tier,
    pub content_weights: ContentWeights,
    pub workshop_weights: ContentWeights,
    /// Tier 2 and above, in priority order
    pub fossilizing_patterns: Vec<AdaptationPriority>,
    pub clustering: ClusteringMode,
    pub computed_at: DateTime<Utc>,
}

impl AdaptationProfile {
    /// Tier-0 profile with default weights
    pub fn empty(learner_id: &str, clustering: ClusteringMode, computed_at: DateTime<Utc>) -> Self {
        Self::from_priorities(learner_id, Vec::new(), clustering, computed_at)
    }

    pub fn from_priorities(
        learner_id: &str,
        mut priorities: Vec<AdaptationPriority>,
        clustering: ClusteringMode,
        computed_at: DateTime<Utc>,
    ) -> Self {
        priorities.sort_by(|a, b| {
            b.tier
                .cmp(&a.tier)
                .then(b.frequency.cmp(&a.frequency))
                .then_with(|| a.pattern_key.cmp(&b.pattern_key))
        });

        let highest_tier = priorities.first().map_or(Tier::None, |p| p.tier);
        let (content_weights, workshop_weights) = synthesize(highest_tier);
        let fossilizing_patterns = priorities
            .iter()
            .filter(|p| p.tier.is_fossilizing())
            .cloned()
            .collect();

        Self {
            learner_id: learner_id.to_string(),
            priorities,
            highest_tier,
            content_weights,
            workshop_weights,
            fossilizing_patterns,
            clustering,
            computed_at,
        }
    }

    pub fn priority(&self, pattern_key: &str) -> Option<&AdaptationPriority> {
        self.priorities.iter().find(|p| p.pattern_key == pattern_key)
    }
}

/// Turn clusters into surfaced priorities.
///
/// `total_events` is the learner's full event count, not the clustered count:
/// events in dropped clusters still dilute every pattern's frequency.
pub fn build_priorities(
    clusters: &[ErrorCluster],
    total_events: usize,
    interventions: &[InterventionRecord],
    config: &TierConfig,
    now: DateTime<Utc>,
) -> Vec<AdaptationPriority> {
    let mut by_pattern: HashMap<&str, Vec<&InterventionRecord>> = HashMap::new();
    for record in interventions {
        by_pattern.entry(record.pattern_key.as_str()).or_default().push(record);
    }

    clusters
        .iter()
        .filter_map(|cluster| {
            let freq = frequency(cluster.len(), total_events);
            if freq < config.nudge_threshold {
                return None;
            }

            let history = by_pattern
                .get(cluster.key.as_str())
                .map(|records| PatternHistory::from_records(records.iter().copied()))
                .unwrap_or_default();
            let tier = classify(freq, &history, config, now);
            if tier == Tier::None {
                return None;
            }

            let mut newest_first: Vec<_> = cluster.members.iter().collect();
            newest_first.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let last_occurred = newest_first.first()?.created_at;

            let examples = newest_first
                .iter()
                .take(MAX_EXAMPLES)
                .map(|e| ExamplePair {
                    incorrect: e.context.clone(),
                    correct: e.correction.clone(),
                })
                .collect();

            Some(AdaptationPriority {
                pattern_key: cluster.key.clone(),
                error_type: cluster.error_type,
                category: cluster.category.clone(),
                frequency: freq,
                tier,
                trend: compute_trend(&cluster.members, now, config),
                intervention_count: history.intervention_count,
                intervention_successes: history.success_count,
                last_intervention_at: history.last_intervention_at,
                examples,
                primary_modality: PrimaryModality::from_events(&cluster.members),
                last_occurred,
                cohesion: cluster.cohesion,
                member_count: cluster.len(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorEvent, Modality};
    use chrono::Duration;

    fn cluster(key: &str, n: usize, now: DateTime<Utc>) -> ErrorCluster {
        let members = (0..n)
            .map(|i| {
                ErrorEvent::new("u1", ErrorType::Grammar, Some("verb_conjugation"), &format!("ctx {}", i), Some("fix"), Modality::Text)
                    .at(now - Duration::hours(i as i64))
            })
            .collect();
        ErrorCluster {
            key: key.to_string(),
            error_type: ErrorType::Grammar,
            category: "verb_conjugation".to_string(),
            members,
            centroid: None,
            cohesion: 1.0,
            representative: 0,
        }
    }

    #[test]
    fn test_low_frequency_patterns_excluded() {
        let now = Utc::now();
        let clusters = vec![cluster("a", 45, now), cluster("b", 30, now)];
        let priorities = build_priorities(&clusters, 100, &[], &TierConfig::default(), now);
        assert_eq!(priorities.len(), 1);
        assert_eq!(priorities[0].pattern_key, "a");
        assert_eq!(priorities[0].frequency, 45);
    }

    #[test]
    fn test_examples_newest_first_and_capped() {
        let now = Utc::now();
        let clusters = vec![cluster("a", 8, now)];
        let priorities = build_priorities(&clusters, 10, &[], &TierConfig::default(), now);
        let p = &priorities[0];
        assert_eq!(p.examples.len(), MAX_EXAMPLES);
        assert_eq!(p.examples[0].incorrect, "ctx 0");
        assert_eq!(p.last_occurred, now);
        assert_eq!(p.primary_modality, PrimaryModality::Text);
    }

    #[test]
    fn test_profile_sorted_by_tier_then_frequency() {
        let now = Utc::now();
        let make = |key: &str, tier: Tier, frequency: u8| AdaptationPriority {
            pattern_key: key.to_string(),
            error_type: ErrorType::Grammar,
            category: "x".to_string(),
            frequency,
            tier,
            trend: Trend::Stable,
            intervention_count: 0,
            intervention_successes: 0,
            last_intervention_at: None,
            examples: Vec::new(),
            primary_modality: PrimaryModality::Mixed,
            last_occurred: now,
            cohesion: 1.0,
            member_count: 1,
        };
        let profile = AdaptationProfile::from_priorities(
            "u1",
            vec![make("a", Tier::Nudge, 90), make("b", Tier::Push, 71), make("c", Tier::Nudge, 95)],
            ClusteringMode::Semantic,
            now,
        );
        let keys: Vec<_> = profile.priorities.iter().map(|p| p.pattern_key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
        assert_eq!(profile.highest_tier, Tier::Push);
        assert_eq!(profile.fossilizing_patterns.len(), 1);
        assert_eq!(profile.content_weights, synthesize(Tier::Push).0);
    }

    #[test]
    fn test_empty_profile() {
        let profile = AdaptationProfile::empty("u1", ClusteringMode::ExactMatch, Utc::now());
        assert!(profile.priorities.is_empty());
        assert_eq!(profile.highest_tier, Tier::None);
        assert_eq!(profile.content_weights, synthesize(Tier::None).0);
    }
}
