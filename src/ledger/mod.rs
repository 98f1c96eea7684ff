//! Intervention Ledger
//!
//! Append-only history of "we targeted pattern P via source S at tier T".
//! Rows are written once by `InterventionLedger::record` and closed out once
//! by the `OutcomeMeasurer`; nothing else mutates or deletes them.

pub mod measurer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::store::AdaptationStore;
use crate::types::{ErrorType, Tier, GENERAL_CATEGORY};

pub use measurer::OutcomeMeasurer;

/// Which surface targeted the pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionSource {
    ContentSelection,
    WorkshopSelection,
    TutorPrompt,
}

impl InterventionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionSource::ContentSelection => "content_selection",
            InterventionSource::WorkshopSelection => "workshop_selection",
            InterventionSource::TutorPrompt => "tutor_prompt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "content_selection" => Some(InterventionSource::ContentSelection),
            "workshop_selection" => Some(InterventionSource::WorkshopSelection),
            "tutor_prompt" => Some(InterventionSource::TutorPrompt),
            _ => None,
        }
    }
}

impl std::fmt::Display for InterventionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionRecord {
    pub id: String,
    pub learner_id: String,
    pub pattern_key: String,
    pub error_type: ErrorType,
    /// `None` for the general category
    pub category: Option<String>,
    /// Tier at the time of the intervention
    pub tier: Tier,
    pub source: InterventionSource,
    pub frequency_at_intervention: u8,
    pub frequency_after_window: Option<u8>,
    pub measured_at: Option<DateTime<Utc>>,
    pub is_resolved: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl InterventionRecord {
    /// New unmeasured row stamped `created_at`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        learner_id: &str,
        pattern_key: &str,
        error_type: ErrorType,
        category: &str,
        tier: Tier,
        source: InterventionSource,
        frequency_at_intervention: u8,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            pattern_key: pattern_key.to_string(),
            error_type,
            category: if category == GENERAL_CATEGORY {
                None
            } else {
                Some(category.to_string())
            },
            tier,
            source,
            frequency_at_intervention,
            frequency_after_window: None,
            measured_at: None,
            is_resolved: None,
            created_at,
        }
    }

    pub fn is_measured(&self) -> bool {
        self.measured_at.is_some()
    }

    /// Measured frequency strictly below the frequency at intervention time
    pub fn is_success(&self) -> bool {
        self.frequency_after_window
            .map_or(false, |after| after < self.frequency_at_intervention)
    }

    pub fn category_label(&self) -> &str {
        self.category.as_deref().unwrap_or(GENERAL_CATEGORY)
    }
}

/// Values written by the single close-out mutation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterventionOutcome {
    pub frequency_after_window: u8,
    pub is_resolved: bool,
    pub measured_at: DateTime<Utc>,
}

/// Ledger writer
#[derive(Clone)]
pub struct InterventionLedger {
    store: Arc<dyn AdaptationStore>,
}

impl InterventionLedger {
    pub fn new(store: Arc<dyn AdaptationStore>) -> Self {
        Self { store }
    }

    /// Append a row. Failures are logged and reported as `None`; a missed
    /// row only delays escalation.
    pub async fn record(&self, record: InterventionRecord) -> Option<InterventionRecord> {
        match self.store.append_intervention(&record).await {
            Ok(()) => {
                debug!(
                    "Recorded {} intervention on {} for {} at tier {}",
                    record.source, record.pattern_key, record.learner_id, record.tier
                );
                Some(record)
            }
            Err(e) => {
                warn!(
                    "Failed to record intervention on {} for {}: {}",
                    record.pattern_key, record.learner_id, e
                );
                None
            }
        }
    }

    /// Fill in outcome fields; `Ok(false)` when the row was already measured
    pub async fn close_out(&self, id: &str, outcome: &InterventionOutcome) -> EngineResult<bool> {
        self.store.close_out_intervention(id, outcome).await
    }

    /// Full history for a learner, newest first
    pub async fn history(&self, learner_id: &str) -> EngineResult<Vec<InterventionRecord>> {
        self.store.interventions_for_learner(learner_id).await
    }
}
