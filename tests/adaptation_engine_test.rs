//! End-to-end tests for the adaptation engine against a temporary database

use adaptation_engine::adaptation::{build_fossilization_alerts_at, synthesize};
use adaptation_engine::clustering::ErrorClusterer;
use adaptation_engine::config::{ClusteringConfig, Config};
use adaptation_engine::embeddings::build_provider;
use adaptation_engine::error::{EngineError, EngineResult};
use adaptation_engine::ledger::{InterventionOutcome, InterventionRecord};
use adaptation_engine::{
    AdaptationEngine, AdaptationStore, ClusteringMode, EmbeddingProvider, ErrorEvent, ErrorType,
    InterventionSource, Modality, SqliteStore, Tier, Trend,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

const DIM: usize = 40;
const LEARNER: &str = "learner-1";
const VERB_KEY: &str = "grammar|verb_conjugation";

/// Verb-conjugation contexts land near one axis; "sound-N" contexts each get
/// their own orthogonal axis.
struct ScriptedEmbedder;

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut v = vec![0.0; DIM];
        if let Some(rest) = text.strip_prefix("sound-") {
            let idx: usize = rest
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| EngineError::Embedding(format!("bad scripted text {}", text)))?;
            v[2 + idx] = 1.0;
        } else {
            v[0] = 1.0;
            v[1] = (text.len() % 5) as f32 * 0.05;
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_id(&self) -> String {
        "scripted".to_string()
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> EngineResult<Vec<f32>> {
        Err(EngineError::Embedding("connection refused".to_string()))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_id(&self) -> String {
        "failing".to_string()
    }
}

async fn setup(provider: Arc<dyn EmbeddingProvider>, background: bool) -> (TempDir, Arc<SqliteStore>, AdaptationEngine) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("adaptation.db")).await.unwrap());

    let mut config = Config::default();
    config.database_path = dir.path().join("adaptation.db");
    config.ledger.measure_in_background = background;

    let clusterer = ErrorClusterer::new(Some(provider), ClusteringConfig::default());
    let engine = AdaptationEngine::new(store.clone(), clusterer, config);
    (dir, store, engine)
}

/// 75 verb-conjugation mistakes and 25 unrelated pronunciation mistakes
fn hundred_events(now: DateTime<Utc>) -> Vec<ErrorEvent> {
    let verbs = ["eu merge", "tu merg", "el merg", "noi merge", "voi merg"];
    let fixes = ["eu merg", "tu mergi", "el merge", "noi mergem", "voi mergeți"];
    let mut events = Vec::new();
    for i in 0..75 {
        let modality = if i % 2 == 0 { Modality::Speech } else { Modality::Text };
        events.push(
            ErrorEvent::new(LEARNER, ErrorType::Grammar, Some("verb_conjugation"), verbs[i % 5], Some(fixes[i % 5]), modality)
                .at(now - Duration::minutes(i as i64 * 10)),
        );
    }
    for i in 0..25 {
        events.push(
            ErrorEvent::new(LEARNER, ErrorType::Pronunciation, Some("vowel"), &format!("sound-{} ă", i), None, Modality::Speech)
                .at(now - Duration::minutes(i as i64 * 7)),
        );
    }
    events
}

#[tokio::test]
async fn test_first_sight_cluster_is_nudge() {
    let now = Utc::now();
    let (_dir, store, engine) = setup(Arc::new(ScriptedEmbedder), false).await;
    store.insert_events(&hundred_events(now)).await.unwrap();

    let profile = engine.get_adaptation_profile_at(LEARNER, now).await.unwrap();
    assert_eq!(profile.clustering, ClusteringMode::Semantic);
    assert_eq!(profile.priorities.len(), 1);

    let top = &profile.priorities[0];
    assert_eq!(top.pattern_key, VERB_KEY);
    assert_eq!(top.frequency, 75);
    assert_eq!(top.member_count, 75);
    assert_eq!(top.tier, Tier::Nudge);
    assert_eq!(top.trend, Trend::Stable);
    assert_eq!(top.examples.len(), 5);
    assert_eq!(profile.highest_tier, Tier::Nudge);
    assert_eq!(profile.content_weights, synthesize(Tier::Nudge).0);
    assert!(profile.fossilizing_patterns.is_empty());
}

#[tokio::test]
async fn test_default_config_keeps_fossilizing_pattern_whole() {
    let now = Utc::now();
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.database_path = dir.path().join("adaptation.db");
    config.ledger.measure_in_background = false;
    assert!(build_provider(&config.embeddings).is_none());

    let engine = AdaptationEngine::from_config(config).await.unwrap();
    let store = engine.store();
    for event in hundred_events(now) {
        store.insert_event(&event).await.unwrap();
    }

    let profile = engine.get_adaptation_profile_at(LEARNER, now).await.unwrap();
    assert_eq!(profile.clustering, ClusteringMode::ExactMatch);
    assert_eq!(profile.priorities.len(), 1);

    let top = &profile.priorities[0];
    assert_eq!(top.pattern_key, VERB_KEY);
    assert_eq!(top.frequency, 75);
    assert_eq!(top.member_count, 75);
    assert_eq!(top.tier, Tier::Nudge);
    assert_eq!(profile.highest_tier, Tier::Nudge);
}

#[tokio::test]
async fn test_clusters_never_mix_error_types() {
    let now = Utc::now();
    let clusterer = ErrorClusterer::new(Some(Arc::new(ScriptedEmbedder)), ClusteringConfig::default());
    let set = clusterer.cluster(&hundred_events(now)).await;

    assert_eq!(set.mode, ClusteringMode::Semantic);
    for cluster in &set.clusters {
        assert!(cluster.members.iter().all(|e| e.error_type == cluster.error_type));
    }
    let pronunciation: usize = set
        .clusters
        .iter()
        .filter(|c| c.error_type == ErrorType::Pronunciation)
        .map(|c| c.len())
        .sum();
    assert!(pronunciation <= 25);
}

#[tokio::test]
async fn test_escalation_through_tiers() {
    let t0 = Utc::now();
    let (_dir, store, engine) = setup(Arc::new(ScriptedEmbedder), false).await;
    store.insert_events(&hundred_events(t0)).await.unwrap();

    // One intervention every 4 days; none of them moves the frequency
    let expected = [Tier::Nudge, Tier::Nudge, Tier::Push, Tier::Push, Tier::Destabilize];
    for (step, want) in expected.iter().enumerate() {
        let now = t0 + Duration::days(4 * step as i64);
        let profile = engine.get_adaptation_profile_at(LEARNER, now).await.unwrap();
        let priority = profile.priority(VERB_KEY).unwrap();
        assert_eq!(priority.tier, *want, "step {}", step);
        assert_eq!(priority.intervention_count, step);
        assert_eq!(priority.intervention_successes, 0);

        let recorded = engine
            .record_intervention_at(LEARNER, priority, InterventionSource::WorkshopSelection, now)
            .await
            .unwrap();
        assert_eq!(recorded.tier, *want);
        assert_eq!(recorded.frequency_at_intervention, 75);
    }

    let history = store.interventions_for_learner(LEARNER).await.unwrap();
    assert_eq!(history.len(), 5);
    // Every row but the newest has been measured as unresolved
    let measured: Vec<_> = history.iter().filter(|r| r.is_measured()).collect();
    assert_eq!(measured.len(), 4);
    assert!(measured.iter().all(|r| r.is_resolved == Some(false) && !r.is_success()));

    let profile = engine.get_adaptation_profile_at(LEARNER, t0 + Duration::days(20)).await.unwrap();
    assert_eq!(profile.highest_tier, Tier::Destabilize);
    assert_eq!(profile.workshop_weights, synthesize(Tier::Destabilize).1);

    let alerts = build_fossilization_alerts_at(&profile, t0 + Duration::days(20));
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].pattern, "grammar: verb_conjugation");
    assert_eq!(alerts[0].examples.len(), 2);
    assert_eq!(alerts[0].last_occurred, "2 weeks ago");
}

#[tokio::test]
async fn test_resolved_outcome_caps_tier() {
    let now = Utc::now();
    let (_dir, store, engine) = setup(Arc::new(ScriptedEmbedder), false).await;
    store.insert_events(&hundred_events(now)).await.unwrap();

    for days in [20, 16, 12, 8, 4] {
        let record = InterventionRecord::new(
            LEARNER, VERB_KEY, ErrorType::Grammar, "verb_conjugation", Tier::Push,
            InterventionSource::TutorPrompt, 75, now - Duration::days(days),
        );
        store.append_intervention(&record).await.unwrap();
        if days == 20 {
            let outcome = InterventionOutcome {
                frequency_after_window: 30,
                is_resolved: true,
                measured_at: now - Duration::days(17),
            };
            assert!(store.close_out_intervention(&record.id, &outcome).await.unwrap());
        }
    }

    let profile = engine.get_adaptation_profile_at(LEARNER, now).await.unwrap();
    let priority = profile.priority(VERB_KEY).unwrap();
    assert_eq!(priority.intervention_count, 5);
    assert_eq!(priority.intervention_successes, 1);
    assert_eq!(priority.tier, Tier::Nudge);
}

#[tokio::test]
async fn test_measurement_is_idempotent() {
    let now = Utc::now();
    let (_dir, store, engine) = setup(Arc::new(ScriptedEmbedder), false).await;
    store.insert_events(&hundred_events(now)).await.unwrap();

    let profile = engine.get_adaptation_profile_at(LEARNER, now).await.unwrap();
    let priority = profile.priority(VERB_KEY).unwrap();
    engine.record_intervention_at(LEARNER, priority, InterventionSource::ContentSelection, now).await.unwrap();

    // Too early to measure
    assert_eq!(engine.measure_outcomes_at(LEARNER, now + Duration::days(1)).await.unwrap(), 0);

    let later = now + Duration::days(3);
    assert_eq!(engine.measure_outcomes_at(LEARNER, later).await.unwrap(), 1);
    assert_eq!(engine.measure_outcomes_at(LEARNER, later + Duration::days(1)).await.unwrap(), 0);

    let history = store.interventions_for_learner(LEARNER).await.unwrap();
    assert_eq!(history[0].frequency_after_window, Some(75));
    assert_eq!(history[0].measured_at, Some(later));
}

#[tokio::test]
async fn test_background_measurement_rides_along_with_profile() {
    let now = Utc::now();
    let (_dir, store, engine) = setup(Arc::new(ScriptedEmbedder), true).await;
    store.insert_events(&hundred_events(now)).await.unwrap();

    let profile = engine.get_adaptation_profile_at(LEARNER, now).await.unwrap();
    engine
        .record_intervention_at(LEARNER, profile.priority(VERB_KEY).unwrap(), InterventionSource::TutorPrompt, now)
        .await
        .unwrap();

    engine.get_adaptation_profile_at(LEARNER, now + Duration::days(5)).await.unwrap();

    let mut measured = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let history = store.interventions_for_learner(LEARNER).await.unwrap();
        if history[0].is_measured() {
            measured = true;
            break;
        }
    }
    assert!(measured, "stale intervention was not measured in the background");
}

#[tokio::test]
async fn test_embedding_failure_falls_back_to_exact_match() {
    let now = Utc::now();
    let (_dir, store, engine) = setup(Arc::new(FailingEmbedder), false).await;
    store.insert_events(&hundred_events(now)).await.unwrap();

    let profile = engine.get_adaptation_profile_at(LEARNER, now).await.unwrap();
    assert_eq!(profile.clustering, ClusteringMode::ExactMatch);
    assert_eq!(profile.priorities.len(), 1);
    assert_eq!(profile.priorities[0].pattern_key, VERB_KEY);
    assert_eq!(profile.priorities[0].frequency, 75);
}

#[tokio::test]
async fn test_unknown_learner_gets_empty_profile() {
    let (_dir, _store, engine) = setup(Arc::new(ScriptedEmbedder), false).await;

    let profile = engine.get_adaptation_profile("nobody").await.unwrap();
    assert!(profile.priorities.is_empty());
    assert!(profile.fossilizing_patterns.is_empty());
    assert_eq!(profile.highest_tier, Tier::None);
    assert_eq!(profile.content_weights, synthesize(Tier::None).0);
    assert_eq!(profile.workshop_weights, synthesize(Tier::None).1);
}

#[tokio::test]
async fn test_activity_stamp_moves_with_ledger() {
    let now = Utc::now();
    let (_dir, store, engine) = setup(Arc::new(ScriptedEmbedder), false).await;
    store.insert_events(&hundred_events(now)).await.unwrap();

    let before = engine.activity_stamp(LEARNER).await.unwrap();
    assert!(before.last_event_at.is_some());
    assert!(before.last_intervention_at.is_none());

    let profile = engine.get_adaptation_profile_at(LEARNER, now).await.unwrap();
    engine
        .record_intervention_at(LEARNER, &profile.priorities[0], InterventionSource::ContentSelection, now)
        .await
        .unwrap();

    let after = engine.activity_stamp(LEARNER).await.unwrap();
    assert_ne!(before, after);
}
