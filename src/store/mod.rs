//! Persistence for error events and the intervention ledger

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::ledger::{InterventionOutcome, InterventionRecord};
use crate::types::ErrorEvent;

pub use sqlite::SqliteStore;

/// Newest timestamps touching a learner's data.
///
/// Any change to a profile's inputs moves at least one of these, so together
/// with the learner id they form a cache invalidation key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStamp {
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_intervention_at: Option<DateTime<Utc>>,
    pub last_measured_at: Option<DateTime<Utc>>,
}

/// Storage backend for the engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdaptationStore: Send + Sync {
    /// Append an error event
    async fn insert_event(&self, event: &ErrorEvent) -> EngineResult<()>;

    /// All of a learner's events, oldest first; malformed rows are skipped
    async fn events_for_learner(&self, learner_id: &str) -> EngineResult<Vec<ErrorEvent>>;

    /// Append a ledger row
    async fn append_intervention(&self, record: &InterventionRecord) -> EngineResult<()>;

    /// All of a learner's ledger rows, newest first; malformed rows are skipped
    async fn interventions_for_learner(&self, learner_id: &str) -> EngineResult<Vec<InterventionRecord>>;

    /// Fill in outcome fields on an unmeasured row. Returns whether a row changed.
    async fn close_out_intervention(&self, id: &str, outcome: &InterventionOutcome) -> EngineResult<bool>;

    async fn latest_activity(&self, learner_id: &str) -> EngineResult<ActivityStamp>;
}
