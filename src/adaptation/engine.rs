//! Adaptation engine
//!
//! Request-scoped: every call reads the learner's events and ledger rows,
//! clusters, classifies and synthesizes weights from scratch. The only writes
//! are ledger appends (`record_intervention`) and outcome close-outs.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::profile::{build_priorities, AdaptationPriority, AdaptationProfile};
use super::trend::frequency;
use crate::clustering::{ClusterSet, ClusteringMode, ErrorClusterer};
use crate::config::Config;
use crate::embeddings::build_provider;
use crate::error::EngineResult;
use crate::ledger::{InterventionLedger, InterventionRecord, InterventionSource, OutcomeMeasurer};
use crate::store::{ActivityStamp, AdaptationStore, SqliteStore};
use crate::types::{pattern_key, ErrorEvent};

pub struct AdaptationEngine {
    store: Arc<dyn AdaptationStore>,
    ledger: InterventionLedger,
    clusterer: ErrorClusterer,
    config: Config,
}

impl AdaptationEngine {
    pub fn new(store: Arc<dyn AdaptationStore>, clusterer: ErrorClusterer, config: Config) -> Self {
        Self {
            ledger: InterventionLedger::new(store.clone()),
            store,
            clusterer,
            config,
        }
    }

    /// Open the configured database and embedding provider
    pub async fn from_config(config: Config) -> EngineResult<Self> {
        config.validate()?;
        let store = SqliteStore::new(&config.database_path).await?;
        let provider = build_provider(&config.embeddings);
        let clusterer = ErrorClusterer::new(provider, config.clustering.clone());
        Ok(Self::new(Arc::new(store), clusterer, config))
    }

    pub fn store(&self) -> Arc<dyn AdaptationStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn get_adaptation_profile(&self, learner_id: &str) -> EngineResult<AdaptationProfile> {
        self.get_adaptation_profile_at(learner_id, Utc::now()).await
    }

    /// Compute the learner's profile as of `now`.
    ///
    /// Only a failed event read is an error. Ledger read failures degrade to
    /// an empty history and embedding failures to exact-match clustering.
    /// Stale ledger rows are measured after tiers are classified, so this
    /// call's tiers never depend on its own measurement.
    pub async fn get_adaptation_profile_at(&self, learner_id: &str, now: DateTime<Utc>) -> EngineResult<AdaptationProfile> {
        let (events, interventions) = tokio::join!(
            self.store.events_for_learner(learner_id),
            self.load_history(learner_id),
        );
        let events = events?;

        let set = self.clusterer.cluster(&events).await;
        if events.is_empty() {
            debug!("No error events for {}, returning empty profile", learner_id);
            return Ok(AdaptationProfile::empty(learner_id, set.mode, now));
        }

        let priorities = build_priorities(&set.clusters, events.len(), &interventions, &self.config.tiers, now);
        self.schedule_measurement(&events, &set, interventions, now).await;

        let profile = AdaptationProfile::from_priorities(learner_id, priorities, set.mode, now);
        debug!(
            "Profile for {}: {} patterns, highest tier {}, {} clustering",
            learner_id,
            profile.priorities.len(),
            profile.highest_tier,
            profile.clustering
        );
        Ok(profile)
    }

    pub async fn record_intervention(
        &self,
        learner_id: &str,
        priority: &AdaptationPriority,
        source: InterventionSource,
    ) -> Option<InterventionRecord> {
        self.record_intervention_at(learner_id, priority, source, Utc::now()).await
    }

    /// Append a ledger row capturing the priority's tier and frequency.
    /// Returns `None` (and logs) when the write fails.
    pub async fn record_intervention_at(
        &self,
        learner_id: &str,
        priority: &AdaptationPriority,
        source: InterventionSource,
        now: DateTime<Utc>,
    ) -> Option<InterventionRecord> {
        let record = InterventionRecord::new(
            learner_id,
            &priority.pattern_key,
            priority.error_type,
            &priority.category,
            priority.tier,
            source,
            priority.frequency,
            now,
        );
        self.ledger.record(record).await
    }

    pub async fn measure_outcomes(&self, learner_id: &str) -> EngineResult<usize> {
        self.measure_outcomes_at(learner_id, Utc::now()).await
    }

    /// Measure stale ledger rows now, waiting for the writes
    pub async fn measure_outcomes_at(&self, learner_id: &str, now: DateTime<Utc>) -> EngineResult<usize> {
        let events = self.store.events_for_learner(learner_id).await?;
        let interventions = self.store.interventions_for_learner(learner_id).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let set = self.clusterer.cluster(&events).await;
        let counts = PatternCounts::new(&events, &set);
        let measurer = self.measurer();
        Ok(measurer.measure(&interventions, |r| counts.frequency_of(r), now).await)
    }

    /// Cache invalidation key inputs for a learner
    pub async fn activity_stamp(&self, learner_id: &str) -> EngineResult<ActivityStamp> {
        self.store.latest_activity(learner_id).await
    }

    async fn load_history(&self, learner_id: &str) -> Vec<InterventionRecord> {
        match self.store.interventions_for_learner(learner_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to read intervention history for {}: {}. Treating as empty", learner_id, e);
                Vec::new()
            }
        }
    }

    fn measurer(&self) -> OutcomeMeasurer {
        OutcomeMeasurer::new(
            self.ledger.clone(),
            self.config.ledger.measurement_window_days,
            self.config.tiers.nudge_threshold,
        )
    }

    async fn schedule_measurement(
        &self,
        events: &[ErrorEvent],
        set: &ClusterSet,
        interventions: Vec<InterventionRecord>,
        now: DateTime<Utc>,
    ) {
        let measurer = self.measurer();
        if measurer.due(&interventions, now).is_empty() {
            return;
        }

        let counts = PatternCounts::new(events, set);
        if self.config.ledger.measure_in_background {
            tokio::spawn(async move {
                measurer.measure(&interventions, |r| counts.frequency_of(r), now).await;
            });
        } else {
            measurer.measure(&interventions, |r| counts.frequency_of(r), now).await;
        }
    }
}

/// Current member counts per pattern key, for outcome measurement
struct PatternCounts {
    total: usize,
    mode: ClusteringMode,
    clusters: HashMap<String, usize>,
    /// Exact (type, category) counts, covering groups dropped below min size
    exact: HashMap<String, usize>,
}

impl PatternCounts {
    fn new(events: &[ErrorEvent], set: &ClusterSet) -> Self {
        let clusters = set.clusters.iter().map(|c| (c.key.clone(), c.len())).collect();
        let mut exact: HashMap<String, usize> = HashMap::new();
        for event in events {
            *exact.entry(pattern_key(event.error_type, event.category_label())).or_insert(0) += 1;
        }
        Self {
            total: events.len(),
            mode: set.mode,
            clusters,
            exact,
        }
    }

    /// Current frequency of the record's pattern.
    ///
    /// A pattern with no current cluster has dissolved (frequency 0) under
    /// semantic clustering. Under exact matching a plain key falls back to the
    /// undersized (type, category) group; a "#n" sub-pattern cannot be told
    /// apart from its category there, so it is left unmeasured (`None`).
    fn frequency_of(&self, record: &InterventionRecord) -> Option<u8> {
        if let Some(&count) = self.clusters.get(&record.pattern_key) {
            return Some(frequency(count, self.total));
        }

        let plain = pattern_key(record.error_type, record.category_label());
        match self.mode {
            ClusteringMode::Semantic => Some(0),
            ClusteringMode::ExactMatch if record.pattern_key == plain => {
                Some(frequency(self.exact.get(&plain).copied().unwrap_or(0), self.total))
            }
            ClusteringMode::ExactMatch => None,
        }
    }
}
